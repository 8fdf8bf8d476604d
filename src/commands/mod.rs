pub mod check;
pub mod crd;
pub mod run;
pub mod version;
