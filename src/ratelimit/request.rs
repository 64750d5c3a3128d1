//! Per-request input to the admission guard.

/// What the guard knows about one inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// HTTP method, e.g. `POST`
    pub method: String,
    /// Logical endpoint identifier, absent for requests not routed to a handler
    pub endpoint: Option<String>,
    /// Action identifier within the endpoint
    pub action: Option<String>,
    /// Raw URL path, without query string
    pub path: String,
    /// Client network address
    pub client_address: Option<String>,
    /// Non-HTTP invocation (e.g. a command-line run); never limited
    pub console: bool,
}

impl RequestDescriptor {
    /// Create a descriptor for an HTTP request.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>, action: Option<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self.action = action;
        self
    }

    pub fn with_client(mut self, address: impl Into<String>) -> Self {
        self.client_address = Some(address.into());
        self
    }

    pub fn as_console(mut self) -> Self {
        self.console = true;
        self
    }

    /// The client address, treating an empty string as unknown.
    pub fn client(&self) -> Option<&str> {
        self.client_address.as_deref().filter(|a| !a.is_empty())
    }
}
