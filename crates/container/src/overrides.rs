//! Overrides: значения, которые вызывающий передает в один `resolve`
//!
//! Просматриваются в обратном порядке, поэтому последний добавленный override
//! одного вида выигрывает.

use std::any::Any;
use std::sync::Arc;

use crate::contract::{Contract, TypeKey};
use crate::injection::InjectionValue;
use crate::reflection::{MemberInfo, ParameterInfo};

#[derive(Clone, Debug)]
pub enum OverrideKind {
    /// Параметр конструктора или метода: по имени и/или типу
    Parameter {
        name: Option<String>,
        ty: Option<TypeKey>,
    },
    Property(String),
    Field(String),
    /// Любое вложенное разрешение контракта
    Dependency { ty: TypeKey, name: Option<Arc<str>> },
}

#[derive(Clone, Debug)]
pub struct ResolverOverride {
    kind: OverrideKind,
    /// Ограничение на тип, который строится
    target: Option<TypeKey>,
    value: InjectionValue,
}

impl ResolverOverride {
    pub fn new(kind: OverrideKind, value: InjectionValue) -> Self {
        Self {
            kind,
            target: None,
            value,
        }
    }

    pub fn parameter<T: Any + Send + Sync>(name: &str, value: T) -> Self {
        Self::new(
            OverrideKind::Parameter {
                name: Some(name.to_string()),
                ty: None,
            },
            InjectionValue::value(value),
        )
    }

    /// Любой параметр объявленного типа `T`
    pub fn parameter_of_type<T: Any + Send + Sync>(value: T) -> Self {
        Self::new(
            OverrideKind::Parameter {
                name: None,
                ty: Some(TypeKey::of::<T>()),
            },
            InjectionValue::value(value),
        )
    }

    pub fn property<T: Any + Send + Sync>(name: &str, value: T) -> Self {
        Self::new(
            OverrideKind::Property(name.to_string()),
            InjectionValue::value(value),
        )
    }

    pub fn field<T: Any + Send + Sync>(name: &str, value: T) -> Self {
        Self::new(
            OverrideKind::Field(name.to_string()),
            InjectionValue::value(value),
        )
    }

    pub fn dependency<T: Any + Send + Sync>(value: T) -> Self {
        Self::new(
            OverrideKind::Dependency {
                ty: TypeKey::of::<T>(),
                name: None,
            },
            InjectionValue::value(value),
        )
    }

    pub fn dependency_named<T: Any + Send + Sync>(name: &str, value: T) -> Self {
        Self::new(
            OverrideKind::Dependency {
                ty: TypeKey::of::<T>(),
                name: Some(Arc::from(name)),
            },
            InjectionValue::value(value),
        )
    }

    /// Применять только при построении типа `T`
    pub fn on_type<T: ?Sized + 'static>(mut self) -> Self {
        self.target = Some(TypeKey::of::<T>());
        self
    }

    pub fn kind(&self) -> &OverrideKind {
        &self.kind
    }

    pub fn value(&self) -> &InjectionValue {
        &self.value
    }

    fn applies_to(&self, declaring: TypeKey) -> bool {
        self.target.map_or(true, |target| target == declaring)
    }

    pub fn matches_parameter(&self, declaring: TypeKey, parameter: &ParameterInfo) -> bool {
        if !self.applies_to(declaring) {
            return false;
        }
        match &self.kind {
            OverrideKind::Parameter { name, ty } => {
                (name.is_some() || ty.is_some())
                    && name.as_deref().map_or(true, |n| n == &*parameter.name)
                    && ty.map_or(true, |t| t == parameter.ty)
            }
            _ => false,
        }
    }

    pub fn matches_field(&self, declaring: TypeKey, field: &MemberInfo) -> bool {
        self.applies_to(declaring)
            && matches!(&self.kind, OverrideKind::Field(name) if name.as_str() == &*field.name)
    }

    pub fn matches_property(&self, declaring: TypeKey, property: &MemberInfo) -> bool {
        self.applies_to(declaring)
            && matches!(&self.kind, OverrideKind::Property(name) if name.as_str() == &*property.name)
    }

    pub fn matches_dependency(&self, contract: &Contract) -> bool {
        match &self.kind {
            OverrideKind::Dependency { ty, name } => {
                *ty == contract.ty() && name.as_deref() == contract.name()
            }
            _ => false,
        }
    }
}

/// Последний подходящий override
pub(crate) fn find_last<'o>(
    overrides: &'o [ResolverOverride],
    mut matches: impl FnMut(&ResolverOverride) -> bool,
) -> Option<&'o ResolverOverride> {
    overrides.iter().rev().find(|candidate| matches(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflection::param;

    struct Service;
    struct Other;

    #[test]
    fn test_parameter_by_name_and_type() {
        let port = param::<u16>("port");

        assert!(ResolverOverride::parameter("port", 80u16).matches_parameter(TypeKey::of::<Service>(), &port));
        assert!(!ResolverOverride::parameter("host", 80u16).matches_parameter(TypeKey::of::<Service>(), &port));
        assert!(ResolverOverride::parameter_of_type(80u16).matches_parameter(TypeKey::of::<Service>(), &port));
        assert!(!ResolverOverride::parameter_of_type(80u32).matches_parameter(TypeKey::of::<Service>(), &port));
    }

    #[test]
    fn test_target_restriction() {
        let port = param::<u16>("port");
        let scoped = ResolverOverride::parameter("port", 80u16).on_type::<Service>();

        assert!(scoped.matches_parameter(TypeKey::of::<Service>(), &port));
        assert!(!scoped.matches_parameter(TypeKey::of::<Other>(), &port));
    }

    #[test]
    fn test_last_override_wins() {
        let port = param::<u16>("port");
        let overrides = vec![
            ResolverOverride::parameter("port", 1u16),
            ResolverOverride::parameter("host", "h".to_string()),
            ResolverOverride::parameter("port", 2u16),
        ];

        let found = find_last(&overrides, |o| o.matches_parameter(TypeKey::of::<Service>(), &port))
            .expect("matched");
        match found.value() {
            InjectionValue::Value { value, .. } => assert_eq!(value.downcast_ref::<u16>(), Some(&2)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_dependency_matches_contract() {
        let named = ResolverOverride::dependency_named::<u16>("port", 8080u16);
        assert!(named.matches_dependency(&Contract::named::<u16>("port")));
        assert!(!named.matches_dependency(&Contract::of::<u16>()));
        assert!(ResolverOverride::dependency(1u16).matches_dependency(&Contract::of::<u16>()));
    }
}
