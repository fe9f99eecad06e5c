mod middleware;
mod public;

pub use middleware::RequestContext;
pub use public::{
    CONTENT_DISPOSITION_VALUE, HttpState, OCTET_STREAM, X_CACHE, build_router,
};
