pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Node {node} requires {field} in the state.")]
	Contract { node: &'static str, field: &'static str },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Provider returned output that does not match the schema: {message}")]
	Schema { message: String },
	#[error("{operation} timed out after {timeout_ms} ms.")]
	Timeout { operation: &'static str, timeout_ms: u64 },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Qdrant error: {message}")]
	Qdrant { message: String },
}
impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<juris_storage::Error> for Error {
	fn from(err: juris_storage::Error) -> Self {
		match err {
			juris_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			juris_storage::Error::SerdeJson(inner) => Self::Storage { message: inner.to_string() },
			juris_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			juris_storage::Error::Qdrant(inner) => Self::Qdrant { message: inner.to_string() },
		}
	}
}

impl From<juris_providers::Error> for Error {
	fn from(err: juris_providers::Error) -> Self {
		match err {
			juris_providers::Error::SchemaMismatch { message } => Self::Schema { message },
			other => Self::Provider { message: other.to_string() },
		}
	}
}
