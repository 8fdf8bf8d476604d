//! Controller maintaining the singleton `pepr-report` ClusterPolicyReport
//! from admission-time policy evaluations, modulated by UDS Exemption
//! resources.

pub mod aggregate;
pub mod controller;
pub mod crd;
pub mod exemptions;
pub mod ingest;
pub mod report;
pub mod server;
pub mod sync;
