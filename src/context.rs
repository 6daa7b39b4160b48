//! Per-request state threaded through the middleware chain.

use http::Extensions;

use crate::error::BoxError;
use crate::request::{Request, RequestHelper};
use crate::response::{ResponseHelper, ResponseWriter};

/// Mutable state for one request.
///
/// The dispatcher creates exactly one `Context` per request before the first
/// middleware runs and drops it once the chain returns. Every middleware in
/// the chain sees the same instance, so anything one of them stores here is
/// visible to the ones after it.
///
/// `res` and `req` are public fields so a middleware can read the request
/// while writing the response.
pub struct Context {
    /// Response sink. Writes go straight to the connection.
    pub res: ResponseWriter,
    /// The incoming request.
    pub req: Request,
    err: Option<BoxError>,
    extensions: Extensions,
}

impl Context {
    pub fn new(res: ResponseWriter, req: Request) -> Self {
        Self { res, req, err: None, extensions: Extensions::new() }
    }

    /// The error recorded by an earlier middleware, if any.
    pub fn error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.err.as_deref()
    }

    pub fn has_error(&self) -> bool {
        self.err.is_some()
    }

    /// Records an error for later middlewares to inspect. Overwrites any
    /// previous one.
    ///
    /// The chain itself never looks at this slot: a middleware that sets an
    /// error and then calls [`Chain::next`](crate::Chain::next) keeps the
    /// chain running.
    pub fn set_error(&mut self, err: impl Into<BoxError>) {
        self.err = Some(err.into());
    }

    pub fn take_error(&mut self) -> Option<BoxError> {
        self.err.take()
    }

    /// Typed per-request values shared between middlewares.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn request_helper(&self) -> RequestHelper<'_> {
        RequestHelper::new(&self.req)
    }

    pub fn response_helper(&mut self) -> ResponseHelper<'_> {
        ResponseHelper::new(&mut self.res)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn context() -> Context {
        let (res, _pending) = ResponseWriter::channel();
        let req = http::Request::builder()
            .uri("/?user=7")
            .body(Bytes::new())
            .unwrap()
            .into();
        Context::new(res, req)
    }

    #[test]
    fn error_slot_is_last_writer_wins() {
        let mut ctx = context();
        assert!(!ctx.has_error());

        ctx.set_error("first");
        ctx.set_error(String::from("second"));
        assert_eq!(ctx.error().unwrap().to_string(), "second");

        assert_eq!(ctx.take_error().unwrap().to_string(), "second");
        assert!(ctx.error().is_none());
    }

    #[test]
    fn extensions_carry_typed_values() {
        #[derive(Clone, Debug, PartialEq)]
        struct UserId(u64);

        let mut ctx = context();
        ctx.extensions_mut().insert(UserId(7));
        assert_eq!(ctx.extensions().get::<UserId>(), Some(&UserId(7)));
    }

    #[test]
    fn request_helper_reads_the_same_request() {
        let ctx = context();
        assert_eq!(ctx.request_helper().query("user").as_deref(), Some("7"));
    }
}
