// Domain-layer modules and shared errors/models
pub mod enrichment {
    pub use crate::enrichment::*;
}

pub mod export {
    pub use crate::export::*;
}

pub mod ingest {
    pub use crate::ingest::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod store {
    pub use crate::store::*;
}

pub mod errors {
    pub use crate::errors::*;
}
