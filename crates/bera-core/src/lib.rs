pub mod config;
pub mod policy;

pub use config::BeraConfig;
pub use policy::DeployPolicy;
