//! Files flexprov reads and writes: settings, the env file, and outputs.

pub mod env_file;
pub mod outputs;
pub mod settings;

pub use env_file::EnvFile;
pub use outputs::Outputs;
