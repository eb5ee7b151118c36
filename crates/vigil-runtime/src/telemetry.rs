//! Structured logging bootstrap, grounded on the teacher's
//! `tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env())`
//! startup call. `VIGIL_LOG` overrides the default filter the same way
//! `RUST_LOG` would, so operators don't have to remember which prefix this
//! workspace uses.

use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("VIGIL_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
