pub mod assembly;
pub mod layout;
pub mod simplify;
