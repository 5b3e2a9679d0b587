//! Concrete factor sources, the model registry and built-in composites.

pub mod composites;
pub mod fama_french;
pub mod q_factors;
pub mod registry;

pub use composites::{find_composite, CompositeEntry, BARILLAS_SHANKEN, STANDARD_COMPOSITES};
pub use fama_french::{FamaFrench, FfModel};
pub use q_factors::QFactors;
pub use registry::{RegistryEntry, SourceRegistry};
