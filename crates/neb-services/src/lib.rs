//! Built-in service types.

use neb_core::service::{ServiceCatalog, ServiceConstructor};

pub mod echo;
pub mod issues;
pub mod relay;

#[cfg(test)]
pub(crate) mod testing;

/// Every service type this build knows how to construct.
pub fn catalog() -> ServiceCatalog {
    ServiceCatalog::new([
        (echo::SERVICE_TYPE, echo::build as ServiceConstructor),
        (issues::SERVICE_TYPE, issues::build as ServiceConstructor),
        (relay::SERVICE_TYPE, relay::build as ServiceConstructor),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lists_builtin_types() {
        assert_eq!(catalog().types(), vec!["echo", "issues", "relay"]);
    }
}
