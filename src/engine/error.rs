use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input or a notice/horizon/opening-hours violation.
    Validation(String),
    /// Unknown or inactive resource, unknown or foreign hold/booking.
    NotFound(Ulid),
    /// Overlap with an occupied interval.
    Conflict(Ulid),
    CapacityExceeded(u32),
    /// The hold's TTL elapsed before confirmation.
    Expired(Ulid),
    /// No requester identity on the session.
    Unauthenticated,
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Status code in the request/response vocabulary of the storefront.
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::Validation(_) | EngineError::LimitExceeded(_) => 400,
            EngineError::Unauthenticated => 401,
            EngineError::NotFound(_) => 404,
            EngineError::Conflict(_) | EngineError::CapacityExceeded(_) => 409,
            EngineError::Expired(_) => 410,
            EngineError::WalError(_) => 500,
        }
    }

    /// SQLSTATE reported over the wire.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "22023",
            EngineError::LimitExceeded(_) => "54000",
            EngineError::Unauthenticated => "28000",
            EngineError::NotFound(_) => "P0002",
            EngineError::Conflict(_) | EngineError::CapacityExceeded(_) => "23P01",
            EngineError::Expired(_) => "55000",
            EngineError::WalError(_) => "XX000",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with occupied interval: {id}"),
            EngineError::CapacityExceeded(cap) => {
                write!(f, "capacity {cap} exceeded: all slots occupied")
            }
            EngineError::Expired(id) => write!(f, "hold {id} expired"),
            EngineError::Unauthenticated => write!(f, "no requester identity"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
