//! Registry mapping a service type to a zero-argument manager constructor.
//!
//! The registry is filled during startup through `&mut self` and then
//! shared read-only behind an `Arc`, so lookups need no locking.

use std::collections::HashMap;
use std::sync::Arc;

use crate::command::CommandValidator;
use crate::instance::ServiceType;
use crate::manager::docker::DockerManager;
use crate::manager::error::ManagerError;
use crate::manager::kubernetes::KubernetesManager;
use crate::manager::minio::MinioManager;
use crate::manager::mysql::MySqlManager;
use crate::manager::nginx::NginxManager;
use crate::manager::postgres::PostgresManager;
use crate::manager::redis::RedisManager;
use crate::manager::ServiceManager;

/// Zero-argument constructor. Must not perform I/O.
pub type Constructor = Arc<dyn Fn() -> Box<dyn ServiceManager> + Send + Sync>;

pub struct ManagerFactory {
    constructors: HashMap<ServiceType, Constructor>,
    validator: Arc<CommandValidator>,
}

impl ManagerFactory {
    /// A factory with nothing registered.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
            validator: Arc::new(CommandValidator::new()),
        }
    }

    /// A factory with every built-in variant and a default command validator.
    pub fn builtin() -> Self {
        Self::with_validator(Arc::new(CommandValidator::new()))
    }

    /// A factory with every built-in variant, sharing `validator` with the
    /// container-runtime exec path.
    pub fn with_validator(validator: Arc<CommandValidator>) -> Self {
        let mut constructors = HashMap::new();
        for ty in ServiceType::ALL {
            constructors.insert(ty, builtin_constructor(ty, &validator));
        }
        Self {
            constructors,
            validator,
        }
    }

    /// Register or replace the constructor for `service_type`.
    pub fn register<F>(&mut self, service_type: ServiceType, constructor: F)
    where
        F: Fn() -> Box<dyn ServiceManager> + Send + Sync + 'static,
    {
        self.constructors.insert(service_type, Arc::new(constructor));
    }

    /// Build an unconnected manager for `service_type`.
    pub fn create(&self, service_type: ServiceType) -> Result<Box<dyn ServiceManager>, ManagerError> {
        let constructor = self.constructors.get(&service_type).ok_or_else(|| {
            ManagerError::Unsupported(format!("no manager registered for type '{}'", service_type))
        })?;
        Ok(constructor())
    }

    /// Build a manager from a raw type discriminant string.
    pub fn create_by_name(&self, name: &str) -> Result<Box<dyn ServiceManager>, ManagerError> {
        let service_type = name
            .parse::<ServiceType>()
            .map_err(|e| ManagerError::Unsupported(e.to_string()))?;
        self.create(service_type)
    }

    pub fn is_registered(&self, service_type: ServiceType) -> bool {
        self.constructors.contains_key(&service_type)
    }

    /// Registered types in declaration order.
    pub fn registered_types(&self) -> Vec<ServiceType> {
        ServiceType::ALL
            .into_iter()
            .filter(|ty| self.constructors.contains_key(ty))
            .collect()
    }

    /// Validator consulted by the container-runtime exec path.
    pub fn validator(&self) -> &Arc<CommandValidator> {
        &self.validator
    }
}

impl Default for ManagerFactory {
    fn default() -> Self {
        Self::builtin()
    }
}

fn builtin_constructor(service_type: ServiceType, validator: &Arc<CommandValidator>) -> Constructor {
    match service_type {
        ServiceType::Mysql => Arc::new(|| -> Box<dyn ServiceManager> { Box::new(MySqlManager::new()) }),
        ServiceType::Postgresql => {
            Arc::new(|| -> Box<dyn ServiceManager> { Box::new(PostgresManager::new()) })
        }
        ServiceType::Redis => Arc::new(|| -> Box<dyn ServiceManager> { Box::new(RedisManager::new()) }),
        ServiceType::Docker => {
            let validator = Arc::clone(validator);
            Arc::new(move || -> Box<dyn ServiceManager> {
                Box::new(DockerManager::new(Arc::clone(&validator)))
            })
        }
        ServiceType::Kubernetes => {
            Arc::new(|| -> Box<dyn ServiceManager> { Box::new(KubernetesManager::new()) })
        }
        ServiceType::Minio => Arc::new(|| -> Box<dyn ServiceManager> { Box::new(MinioManager::new()) }),
        ServiceType::Nginx => Arc::new(|| -> Box<dyn ServiceManager> { Box::new(NginxManager::new()) }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registers_every_type() {
        let factory = ManagerFactory::builtin();
        assert_eq!(factory.registered_types(), ServiceType::ALL.to_vec());
        for ty in ServiceType::ALL {
            let manager = factory.create(ty).unwrap();
            assert_eq!(manager.service_type(), ty);
        }
    }

    #[test]
    fn test_unregistered_type_is_unsupported() {
        let factory = ManagerFactory::empty();
        assert!(matches!(
            factory.create(ServiceType::Redis),
            Err(ManagerError::Unsupported(_))
        ));
    }

    #[test]
    fn test_unknown_name_is_unsupported() {
        let factory = ManagerFactory::builtin();
        assert!(matches!(
            factory.create_by_name("mongodb"),
            Err(ManagerError::Unsupported(_))
        ));
        assert_eq!(
            factory.create_by_name("postgres").unwrap().service_type(),
            ServiceType::Postgresql
        );
    }

    #[test]
    fn test_register_replaces_builtin() {
        let mut factory = ManagerFactory::builtin();
        factory.register(ServiceType::Redis, || -> Box<dyn ServiceManager> {
            Box::new(NginxManager::new())
        });
        assert_eq!(
            factory.create(ServiceType::Redis).unwrap().service_type(),
            ServiceType::Nginx
        );
    }
}
