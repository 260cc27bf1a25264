//! Line-delimited JSON request handler.
//!
//! Reads one request per line, dispatches it to the operation handler and
//! writes exactly one response line back. Logs go to stderr so the output
//! stream carries nothing but responses.
//!
//!   recon serve < requests.jsonl

mod handlers;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use recon_protocol::{ops::names, RpcError, RpcRequest, RpcResponse, PROTOCOL_MAX, PROTOCOL_MIN};
use tracing::{debug, warn};

use crate::manager::JobManager;
use crate::upload::UploadValidator;

/// Request handler bound to one job manager.
pub struct RpcHandler {
    manager: Arc<JobManager>,
    uploads: UploadValidator,
}

impl RpcHandler {
    pub fn new(manager: Arc<JobManager>, uploads: UploadValidator) -> Self {
        Self { manager, uploads }
    }

    pub fn manager(&self) -> &Arc<JobManager> {
        &self.manager
    }

    /// Serve requests from stdin until EOF.
    pub fn run(&self) -> io::Result<()> {
        self.serve(&mut io::stdin().lock(), &mut io::stdout().lock())
    }

    /// Serve requests from `reader` until EOF, answering on `writer`.
    ///
    /// Blank lines are skipped. A malformed line gets an error response and
    /// the loop carries on.
    pub fn serve<R: BufRead, W: Write>(&self, reader: &mut R, writer: &mut W) -> io::Result<()> {
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(());
            }
            if line.trim().is_empty() {
                continue;
            }

            let response = self.handle_line(&line);
            self.write_response(writer, &response)?;
        }
    }

    /// Answer a single request line.
    pub fn handle_line(&self, line: &str) -> RpcResponse {
        let request: RpcRequest = match serde_json::from_str(line.trim()) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "unparseable request");
                return RpcResponse::error(
                    PROTOCOL_MAX,
                    String::new(),
                    RpcError::invalid_request(format!("invalid JSON: {}", e)),
                );
            }
        };

        if let Err(e) = Self::validate_protocol_version(&request) {
            return RpcResponse::error(request.protocol_version, request.request_id, e);
        }

        self.dispatch(&request)
    }

    fn validate_protocol_version(request: &RpcRequest) -> Result<(), RpcError> {
        if request.protocol_version < PROTOCOL_MIN || request.protocol_version > PROTOCOL_MAX {
            return Err(RpcError::unsupported_protocol(
                request.protocol_version,
                PROTOCOL_MIN,
                PROTOCOL_MAX,
            ));
        }
        Ok(())
    }

    fn dispatch(&self, request: &RpcRequest) -> RpcResponse {
        debug!(op = %request.op, request_id = %request.request_id, "dispatching request");

        let result = match request.op.as_str() {
            names::HEALTH => handlers::health(&self.manager),
            names::SUBMIT => handlers::submit(request, &self.manager, &self.uploads),
            names::STATUS => handlers::status(request, &self.manager),
            names::CANCEL => handlers::cancel(request, &self.manager),
            names::RESULT => handlers::result(request, &self.manager),
            names::LIST => handlers::list(&self.manager),
            names::CONFIG => handlers::config(&self.uploads),
            _ => Err(RpcError::unknown_operation(&request.op)),
        };

        if let Err(e) = &result {
            debug!(op = %request.op, code = %e.code, "request failed");
        }
        RpcResponse::from_result(request.protocol_version, request.request_id.clone(), result)
    }

    fn write_response<W: Write>(&self, writer: &mut W, response: &RpcResponse) -> io::Result<()> {
        let json = serde_json::to_string(response)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(writer, "{}", json)?;
        writer.flush()
    }
}
