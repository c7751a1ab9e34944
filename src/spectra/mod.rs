pub mod coadd;
pub mod model;
