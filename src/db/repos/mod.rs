pub mod fingerprints;
pub mod history;
pub mod settings;
