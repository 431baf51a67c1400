//! Идентичность типов и контрактов разрешения
//!
//! `TypeKey` заменяет runtime type handle: `TypeId` плюс читаемое имя для
//! диагностики. `Contract` = тип + опциональное имя с заранее посчитанным хэшем,
//! который используется всеми хэш-таблицами контейнера.

use std::any::{Any, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Type-erased значение, которое производит контейнер
pub type Value = Arc<dyn Any + Send + Sync>;

/// Форма запроса: сам тип, массив всех регистраций или отложенное разрешение
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Single,
    Array,
    Deferred,
}

/// Ключ типа: идентичность + имя для сообщений об ошибках
///
/// Сравнение и хэш учитывают только `TypeId` и форму, имя не участвует.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
    shape: Shape,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            shape: Shape::Single,
        }
    }

    /// Ключ для значения, у которого известен только `TypeId`
    pub fn erased(id: TypeId) -> Self {
        Self {
            id,
            name: "<erased>",
            shape: Shape::Single,
        }
    }

    /// Конкретный тип, лежащий внутри type-erased значения
    pub fn of_value(value: &(dyn Any + Send + Sync)) -> Self {
        Self::erased(Any::type_id(value))
    }

    /// "Массив T". Вложенные формы не поддерживаются: форма заменяется.
    pub fn array(self) -> Self {
        Self {
            shape: Shape::Array,
            ..self
        }
    }

    /// "T, разрешаемый позже" (`Lazy<T>`, `Func<T>`)
    pub fn deferred(self) -> Self {
        Self {
            shape: Shape::Deferred,
            ..self
        }
    }

    pub fn element(self) -> Option<Self> {
        (self.shape == Shape::Array).then_some(self.single())
    }

    /// Тип, который разрешает отложенный запрос
    pub fn target(self) -> Option<Self> {
        (self.shape == Shape::Deferred).then_some(self.single())
    }

    fn single(self) -> Self {
        Self {
            shape: Shape::Single,
            ..self
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn is_array(&self) -> bool {
        self.shape == Shape::Array
    }

    pub fn is_deferred(&self) -> bool {
        self.shape == Shape::Deferred
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn hash_code(&self) -> u32 {
        let mut hasher = DefaultHasher::new();
        self.id.hash(&mut hasher);
        self.shape.hash(&mut hasher);
        fold(hasher.finish())
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.shape == other.shape
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.shape.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shape {
            Shape::Single => f.write_str(self.name),
            Shape::Array => write!(f, "[{}]", self.name),
            Shape::Deferred => write!(f, "Deferred<{}>", self.name),
        }
    }
}

fn fold(hash: u64) -> u32 {
    (hash as u32) ^ ((hash >> 32) as u32)
}

pub(crate) fn name_hash(name: Option<&str>) -> u32 {
    match name {
        Some(name) => {
            let mut hasher = DefaultHasher::new();
            name.hash(&mut hasher);
            fold(hasher.finish())
        }
        None => 0,
    }
}

pub(crate) fn combine(type_hash: u32, name_hash: u32) -> u32 {
    type_hash.wrapping_add(37) ^ name_hash.wrapping_add(17)
}

/// Ключ запроса разрешения: тип + опциональное имя
#[derive(Clone)]
pub struct Contract {
    ty: TypeKey,
    name: Option<Arc<str>>,
    hash: u32,
}

impl Contract {
    pub fn new(ty: TypeKey, name: Option<&str>) -> Self {
        Self::with_shared_name(ty, name.map(Arc::from))
    }

    /// Контракт с уже интернированным именем
    pub fn with_shared_name(ty: TypeKey, name: Option<Arc<str>>) -> Self {
        let hash = combine(ty.hash_code(), name_hash(name.as_deref()));
        Self { ty, name, hash }
    }

    pub fn anonymous(ty: TypeKey) -> Self {
        Self::with_shared_name(ty, None)
    }

    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::anonymous(TypeKey::of::<T>())
    }

    pub fn named<T: ?Sized + 'static>(name: &str) -> Self {
        Self::new(TypeKey::of::<T>(), Some(name))
    }

    pub fn ty(&self) -> TypeKey {
        self.ty
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn shared_name(&self) -> Option<&Arc<str>> {
        self.name.as_ref()
    }

    pub fn hash_code(&self) -> u32 {
        self.hash
    }

    /// Тот же контракт для другого типа (имя сохраняется)
    pub fn retype(&self, ty: TypeKey) -> Self {
        Self::with_shared_name(ty, self.name.clone())
    }
}

impl PartialEq for Contract {
    fn eq(&self, other: &Self) -> bool {
        if self.hash != other.hash || self.ty != other.ty {
            return false;
        }
        match (&self.name, &other.name) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

impl Eq for Contract {}

impl Hash for Contract {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash);
    }
}

impl fmt::Debug for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}(\"{}\")", self.ty, name),
            None => write!(f, "{}", self.ty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter {}
    struct English;

    #[test]
    fn test_contract_equality_by_type_and_name() {
        let a = Contract::named::<English>("x");
        let b = Contract::new(TypeKey::of::<English>(), Some("x"));
        let c = Contract::named::<English>("y");
        let d = Contract::of::<English>();

        assert_eq!(a, b);
        assert_eq!(a.hash_code(), b.hash_code());
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_ne!(Contract::of::<dyn Greeter>(), d);
    }

    #[test]
    fn test_array_key_is_distinct_from_element() {
        let element = TypeKey::of::<English>();
        let array = element.array();

        assert!(array.is_array());
        assert_ne!(array, element);
        assert_ne!(array.hash_code(), element.hash_code());
        assert_eq!(array.element(), Some(element));
        assert_eq!(element.element(), None);
        assert_eq!(array.array(), array);
    }

    #[test]
    fn test_deferred_key_is_distinct_from_target_and_array() {
        let target = TypeKey::of::<English>();
        let deferred = target.deferred();

        assert!(deferred.is_deferred());
        assert_eq!(deferred.shape(), Shape::Deferred);
        assert_ne!(deferred, target);
        assert_ne!(deferred, target.array());
        assert_eq!(deferred.target(), Some(target));
        assert_eq!(deferred.element(), None);
        assert_eq!(target.array().target(), None);
        assert_eq!(TypeKey::of::<u32>().deferred().to_string(), "Deferred<u32>");
    }

    #[test]
    fn test_erased_key_matches_typed_key() {
        let value: Value = Arc::new(English);
        assert_eq!(TypeKey::of_value(value.as_ref()), TypeKey::of::<English>());
        assert_ne!(TypeKey::of_value(value.as_ref()), TypeKey::of::<Value>());
    }

    #[test]
    fn test_display() {
        let contract = Contract::named::<u32>("port");
        assert_eq!(contract.to_string(), "u32(\"port\")");
        assert_eq!(TypeKey::of::<u32>().array().to_string(), "[u32]");
    }
}
