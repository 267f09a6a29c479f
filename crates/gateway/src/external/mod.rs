//! Seams to the service's external collaborators: the minter, the identity
//! directory, and the DataCite-style DOI registrar.

pub mod datacite;
pub mod identity;
pub mod minter;
