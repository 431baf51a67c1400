//! Конфигурация внедрения для регистрации: какой конструктор, какие методы,
//! поля и свойства заполнять и какими значениями

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::contract::{Contract, TypeKey, Value};
use crate::pipeline::BuilderContext;

pub type ValueFactory =
    Arc<dyn Fn(&mut BuilderContext<'_>) -> anyhow::Result<Value> + Send + Sync>;

/// Значение для одного параметра/поля/свойства
#[derive(Clone)]
pub enum InjectionValue {
    /// Готовое значение
    Value { ty: TypeKey, value: Value },
    /// Вложенное разрешение контракта
    Resolve { ty: TypeKey, name: Option<Arc<str>> },
    /// Делегат, вызываемый с текущим контекстом
    Factory { ty: Option<TypeKey>, factory: ValueFactory },
    /// Разрешить объявленный член как указанный тип
    Type(TypeKey),
}

impl InjectionValue {
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        InjectionValue::Value {
            ty: TypeKey::of::<T>(),
            value: Arc::new(value),
        }
    }

    pub fn resolve<T: ?Sized + 'static>() -> Self {
        InjectionValue::Resolve {
            ty: TypeKey::of::<T>(),
            name: None,
        }
    }

    pub fn resolve_named<T: ?Sized + 'static>(name: &str) -> Self {
        InjectionValue::Resolve {
            ty: TypeKey::of::<T>(),
            name: Some(Arc::from(name)),
        }
    }

    pub fn factory<F>(ty: Option<TypeKey>, factory: F) -> Self
    where
        F: Fn(&mut BuilderContext<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        InjectionValue::Factory {
            ty,
            factory: Arc::new(factory),
        }
    }

    pub fn of_type<T: ?Sized + 'static>() -> Self {
        InjectionValue::Type(TypeKey::of::<T>())
    }

    /// Объявленный тип значения, если он известен
    pub fn declared_type(&self) -> Option<TypeKey> {
        match self {
            InjectionValue::Value { ty, .. } | InjectionValue::Resolve { ty, .. } => Some(*ty),
            InjectionValue::Factory { ty, .. } => *ty,
            InjectionValue::Type(ty) => Some(*ty),
        }
    }

    pub(crate) fn contract(&self, fallback_name: Option<&Arc<str>>) -> Option<Contract> {
        match self {
            InjectionValue::Resolve { ty, name } => {
                Some(Contract::with_shared_name(*ty, name.clone()))
            }
            InjectionValue::Type(ty) => {
                Some(Contract::with_shared_name(*ty, fallback_name.cloned()))
            }
            _ => None,
        }
    }
}

impl fmt::Debug for InjectionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InjectionValue::Value { ty, .. } => write!(f, "Value({})", ty),
            InjectionValue::Resolve { ty, name } => write!(f, "Resolve({}, {:?})", ty, name),
            InjectionValue::Factory { ty, .. } => write!(f, "Factory({:?})", ty),
            InjectionValue::Type(ty) => write!(f, "Type({})", ty),
        }
    }
}

/// Член типа, настроенный для внедрения
#[derive(Clone, Debug)]
pub enum InjectionMember {
    /// Конструктор с указанной сигнатурой аргументов
    Constructor(Vec<InjectionValue>),
    Method {
        name: String,
        args: Vec<InjectionValue>,
    },
    Field {
        name: String,
        value: Option<InjectionValue>,
    },
    Property {
        name: String,
        value: Option<InjectionValue>,
    },
}

impl InjectionMember {
    pub fn constructor(args: Vec<InjectionValue>) -> Self {
        InjectionMember::Constructor(args)
    }

    pub fn method(name: &str, args: Vec<InjectionValue>) -> Self {
        InjectionMember::Method {
            name: name.to_string(),
            args,
        }
    }

    pub fn field(name: &str) -> Self {
        InjectionMember::Field {
            name: name.to_string(),
            value: None,
        }
    }

    pub fn field_with(name: &str, value: InjectionValue) -> Self {
        InjectionMember::Field {
            name: name.to_string(),
            value: Some(value),
        }
    }

    pub fn property(name: &str) -> Self {
        InjectionMember::Property {
            name: name.to_string(),
            value: None,
        }
    }

    pub fn property_with(name: &str, value: InjectionValue) -> Self {
        InjectionMember::Property {
            name: name.to_string(),
            value: Some(value),
        }
    }
}
