use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("Only PDF files are supported: {0}")]
    UnsupportedFile(String),

    #[error("PDF appears to be empty or contains insufficient text ({length} characters, need {minimum})")]
    InsufficientContent { length: usize, minimum: usize },

    #[error("Failed to create chunks from PDF: empty chunking result for {0}")]
    EmptyChunking(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("Ingestion failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("rate limit reached: {0}")]
    RateLimited(String),

    #[error("language model returned {status}: {details}")]
    BackendResponse { status: u16, details: String },

    #[error("language model returned an empty completion")]
    EmptyResponse,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model request failed: {0}")]
    Request(String),
}

impl ModelError {
    /// True for the explicit rate-limit variant and for any error whose text
    /// carries a `rate_limit` marker or an HTTP 429.
    pub fn is_rate_limit(&self) -> bool {
        if matches!(self, ModelError::RateLimited(_)) {
            return true;
        }
        let message = self.to_string();
        message.to_lowercase().contains("rate_limit") || message.contains("429")
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("query failed: {0}")]
    Failed(String),
}

impl From<StoreError> for QueryError {
    fn from(value: StoreError) -> Self {
        QueryError::Failed(value.to_string())
    }
}

impl From<ModelError> for QueryError {
    fn from(value: ModelError) -> Self {
        QueryError::Failed(value.to_string())
    }
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("graph snapshot is not valid json: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TestsetError {
    #[error("Knowledge graph not created. Build a knowledge graph before generating a testset.")]
    MissingGraph,

    #[error("No documents found in the vector store")]
    NoDocuments,

    #[error("No documents found for file '{0}'. Make sure the PDF is ingested first.")]
    NoDocumentsForFile(String),

    #[error("Rate limit exceeded after {attempts} attempts. Please try again later or reduce testset_size.")]
    RateLimitExceeded { attempts: usize },

    #[error("invalid query distribution: {0}")]
    InvalidDistribution(String),

    #[error("testset size must be at least 1")]
    EmptyRequest,

    #[error("Testset generation failed: {0}")]
    Model(#[from] ModelError),

    #[error("Testset generation failed: {0}")]
    Store(#[from] StoreError),

    #[error("Testset generation failed: {0}")]
    Graph(#[from] GraphError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid url for {field}: {source}")]
    Url {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid value for {field}: {details}")]
    Invalid { field: &'static str, details: String },
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("vector store unreachable: {0}")]
    Store(#[from] StoreError),

    #[error("language model client could not be built: {0}")]
    Model(#[from] ModelError),
}

/// Failure of any request routed through the application context.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("System not initialized: {0}")]
    NotInitialized(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Testset(#[from] TestsetError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}
