//! Описание членов типов (member provider)
//!
//! Rust не дает runtime reflection, поэтому контейнер получает конструкторы,
//! поля, свойства и методы через `MemberProvider`. `TypeCatalog` - реализация
//! по умолчанию: типы описываются вручную через `TypeBuilder`.
//!
//! Порядок членов в описании стабилен и используется как tie-break при выборе.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::contract::{Contract, TypeKey, Value};
use crate::deferred::{Deferred, Func, Lazy};
use crate::errors::InvokeError;

/// Только что созданный объект, еще не опубликованный
pub type Instance = Box<dyn Any + Send + Sync>;

pub type ConstructorInvoker =
    Arc<dyn Fn(&Arguments) -> Result<Instance, InvokeError> + Send + Sync>;
pub type MethodInvoker =
    Arc<dyn Fn(&mut dyn Any, &Arguments) -> Result<(), InvokeError> + Send + Sync>;
pub type Setter = Arc<dyn Fn(&mut dyn Any, Value) -> Result<(), InvokeError> + Send + Sync>;
pub type Disposer = Arc<dyn Fn(&Value) + Send + Sync>;

/// Объекты, которые контейнер освобождает при уничтожении своего scope
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

/// Источник описаний типов
pub trait MemberProvider: Send + Sync {
    fn type_info(&self, ty: TypeKey) -> Option<Arc<TypeInfo>>;
}

/// Аргументы вызова конструктора или метода
#[derive(Clone, Default)]
pub struct Arguments {
    values: Vec<Value>,
}

impl Arguments {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn raw(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Аргумент как `Arc<T>`
    pub fn get<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>, InvokeError> {
        self.values
            .get(index)
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
            .ok_or(InvokeError::ArgumentMismatch {
                index,
                expected: std::any::type_name::<T>(),
            })
    }

    /// Аргумент параметра `deferred_param::<T>`, разрешается при первом `get`
    pub fn lazy<T: Any + Send + Sync>(&self, index: usize) -> Result<Lazy<T>, InvokeError> {
        self.deferred::<T>(index).map(Lazy::new)
    }

    /// Аргумент параметра `deferred_param::<T>`, разрешается на каждый `call`
    pub fn func<T: Any + Send + Sync>(&self, index: usize) -> Result<Func<T>, InvokeError> {
        self.deferred::<T>(index).map(Func::new)
    }

    fn deferred<T: Any>(&self, index: usize) -> Result<Arc<Deferred>, InvokeError> {
        self.get::<Deferred>(index)
            .ok()
            .filter(|deferred| deferred.targets::<T>())
            .ok_or(InvokeError::ArgumentMismatch {
                index,
                expected: std::any::type_name::<T>(),
            })
    }

    /// Аргумент по значению (для примитивов и строк)
    pub fn cloned<T: Any + Send + Sync + Clone>(&self, index: usize) -> Result<T, InvokeError> {
        self.values
            .get(index)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
            .ok_or(InvokeError::ArgumentMismatch {
                index,
                expected: std::any::type_name::<T>(),
            })
    }
}

/// Параметр конструктора или метода
#[derive(Clone)]
pub struct ParameterInfo {
    pub name: Arc<str>,
    pub ty: TypeKey,
    /// Имя контракта, по которому разрешается зависимость
    pub contract_name: Option<Arc<str>>,
    pub default: Option<Value>,
}

impl ParameterInfo {
    pub fn new(name: &str, ty: TypeKey) -> Self {
        Self {
            name: Arc::from(name),
            ty,
            contract_name: None,
            default: None,
        }
    }

    pub fn named(mut self, contract_name: &str) -> Self {
        self.contract_name = Some(Arc::from(contract_name));
        self
    }

    pub fn with_default<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.default = Some(Arc::new(value));
        self
    }

    pub fn contract(&self) -> Contract {
        Contract::with_shared_name(self.ty, self.contract_name.clone())
    }
}

/// Короткая форма `ParameterInfo::new(name, TypeKey::of::<T>())`
pub fn param<T: ?Sized + 'static>(name: &str) -> ParameterInfo {
    ParameterInfo::new(name, TypeKey::of::<T>())
}

/// Параметр `Lazy<T>`/`Func<T>`: значение получают через `Arguments::lazy`/`func`
pub fn deferred_param<T: ?Sized + 'static>(name: &str) -> ParameterInfo {
    ParameterInfo::new(name, TypeKey::of::<T>().deferred())
}

#[derive(Clone)]
pub struct ConstructorInfo {
    pub parameters: Vec<ParameterInfo>,
    /// Явная пометка "использовать этот конструктор"
    pub is_import: bool,
    invoker: ConstructorInvoker,
}

impl ConstructorInfo {
    pub fn new(parameters: Vec<ParameterInfo>, invoker: ConstructorInvoker) -> Self {
        Self {
            parameters,
            is_import: false,
            invoker,
        }
    }

    pub fn invoke(&self, args: &Arguments) -> Result<Instance, InvokeError> {
        (self.invoker)(args)
    }

    pub fn signature(&self) -> Vec<TypeKey> {
        self.parameters.iter().map(|p| p.ty).collect()
    }
}

#[derive(Clone)]
pub struct MethodInfo {
    pub name: Arc<str>,
    pub parameters: Vec<ParameterInfo>,
    pub is_import: bool,
    invoker: MethodInvoker,
}

impl MethodInfo {
    pub fn new(name: &str, parameters: Vec<ParameterInfo>, invoker: MethodInvoker) -> Self {
        Self {
            name: Arc::from(name),
            parameters,
            is_import: false,
            invoker,
        }
    }

    pub fn invoke(&self, target: &mut dyn Any, args: &Arguments) -> Result<(), InvokeError> {
        (self.invoker)(target, args)
    }
}

/// Поле или свойство: оба описываются именем, типом и сеттером
#[derive(Clone)]
pub struct MemberInfo {
    pub name: Arc<str>,
    pub ty: TypeKey,
    pub contract_name: Option<Arc<str>>,
    pub is_import: bool,
    setter: Setter,
}

pub type FieldInfo = MemberInfo;
pub type PropertyInfo = MemberInfo;

impl MemberInfo {
    pub fn new(name: &str, ty: TypeKey, setter: Setter) -> Self {
        Self {
            name: Arc::from(name),
            ty,
            contract_name: None,
            is_import: false,
            setter,
        }
    }

    pub fn assign(&self, target: &mut dyn Any, value: Value) -> Result<(), InvokeError> {
        (self.setter)(target, value)
    }

    pub fn contract(&self) -> Contract {
        Contract::with_shared_name(self.ty, self.contract_name.clone())
    }
}

/// Описание одного типа
#[derive(Clone)]
pub struct TypeInfo {
    pub ty: TypeKey,
    pub constructors: Vec<ConstructorInfo>,
    pub fields: Vec<FieldInfo>,
    pub properties: Vec<PropertyInfo>,
    pub methods: Vec<MethodInfo>,
    /// Открытое generic-определение, из которого получен этот тип
    pub generic_definition: Option<TypeKey>,
    pub disposer: Option<Disposer>,
}

impl TypeInfo {
    pub fn new(ty: TypeKey) -> Self {
        Self {
            ty,
            constructors: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            generic_definition: None,
            disposer: None,
        }
    }
}

/// Реестр описаний типов в памяти
#[derive(Default)]
pub struct TypeCatalog {
    types: RwLock<HashMap<TypeKey, Arc<TypeInfo>>>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавить или заменить описание
    pub fn register(&self, info: TypeInfo) -> &Self {
        self.types.write().insert(info.ty, Arc::new(info));
        self
    }

    /// Начать описание типа `T`; завершается `TypeBuilder::build`
    pub fn describe<T: Any + Send + Sync>(&self) -> TypeBuilder<'_, T> {
        TypeBuilder {
            catalog: self,
            info: TypeInfo::new(TypeKey::of::<T>()),
            _marker: PhantomData,
        }
    }

    pub fn contains(&self, ty: TypeKey) -> bool {
        self.types.read().contains_key(&ty)
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}

impl MemberProvider for TypeCatalog {
    fn type_info(&self, ty: TypeKey) -> Option<Arc<TypeInfo>> {
        self.types.read().get(&ty).cloned()
    }
}

fn downcast_target<'a, T: Any>(target: &'a mut dyn Any, member: &str) -> Result<&'a mut T, InvokeError> {
    target
        .downcast_mut::<T>()
        .ok_or_else(|| InvokeError::Inaccessible {
            member: member.to_string(),
            reason: format!("target is not {}", std::any::type_name::<T>()),
        })
}

/// Типизированный построитель `TypeInfo`
pub struct TypeBuilder<'c, T> {
    catalog: &'c TypeCatalog,
    info: TypeInfo,
    _marker: PhantomData<fn() -> T>,
}

impl<'c, T: Any + Send + Sync> TypeBuilder<'c, T> {
    pub fn constructor<F>(mut self, parameters: Vec<ParameterInfo>, f: F) -> Self
    where
        F: Fn(&Arguments) -> Result<T, InvokeError> + Send + Sync + 'static,
    {
        let invoker: ConstructorInvoker = Arc::new(move |args| Ok(Box::new(f(args)?) as Instance));
        self.info
            .constructors
            .push(ConstructorInfo::new(parameters, invoker));
        self
    }

    /// Конструктор с явной пометкой для выбора
    pub fn import_constructor<F>(self, parameters: Vec<ParameterInfo>, f: F) -> Self
    where
        F: Fn(&Arguments) -> Result<T, InvokeError> + Send + Sync + 'static,
    {
        let mut this = self.constructor(parameters, f);
        if let Some(last) = this.info.constructors.last_mut() {
            last.is_import = true;
        }
        this
    }

    fn member<V, F>(name: &str, f: F) -> MemberInfo
    where
        V: Any + Send + Sync,
        F: Fn(&mut T, Arc<V>) + Send + Sync + 'static,
    {
        let member = name.to_string();
        let setter: Setter = Arc::new(move |target, value| {
            let target = downcast_target::<T>(target, &member)?;
            let value = value.downcast::<V>().map_err(|_| InvokeError::ArgumentMismatch {
                index: 0,
                expected: std::any::type_name::<V>(),
            })?;
            f(target, value);
            Ok(())
        });
        MemberInfo::new(name, TypeKey::of::<V>(), setter)
    }

    /// Поле, заполняемое только при явной конфигурации регистрации
    pub fn field<V, F>(mut self, name: &str, f: F) -> Self
    where
        V: Any + Send + Sync,
        F: Fn(&mut T, Arc<V>) + Send + Sync + 'static,
    {
        self.info.fields.push(Self::member(name, f));
        self
    }

    /// Поле, которое заполняется всегда
    pub fn import_field<V, F>(mut self, name: &str, contract_name: Option<&str>, f: F) -> Self
    where
        V: Any + Send + Sync,
        F: Fn(&mut T, Arc<V>) + Send + Sync + 'static,
    {
        let mut member = Self::member(name, f);
        member.is_import = true;
        member.contract_name = contract_name.map(Arc::from);
        self.info.fields.push(member);
        self
    }

    pub fn property<V, F>(mut self, name: &str, f: F) -> Self
    where
        V: Any + Send + Sync,
        F: Fn(&mut T, Arc<V>) + Send + Sync + 'static,
    {
        self.info.properties.push(Self::member(name, f));
        self
    }

    pub fn import_property<V, F>(mut self, name: &str, contract_name: Option<&str>, f: F) -> Self
    where
        V: Any + Send + Sync,
        F: Fn(&mut T, Arc<V>) + Send + Sync + 'static,
    {
        let mut member = Self::member(name, f);
        member.is_import = true;
        member.contract_name = contract_name.map(Arc::from);
        self.info.properties.push(member);
        self
    }

    fn method_info<F>(name: &str, parameters: Vec<ParameterInfo>, f: F) -> MethodInfo
    where
        F: Fn(&mut T, &Arguments) -> Result<(), InvokeError> + Send + Sync + 'static,
    {
        let member = name.to_string();
        let invoker: MethodInvoker = Arc::new(move |target, args| {
            let target = downcast_target::<T>(target, &member)?;
            f(target, args)
        });
        MethodInfo::new(name, parameters, invoker)
    }

    pub fn method<F>(mut self, name: &str, parameters: Vec<ParameterInfo>, f: F) -> Self
    where
        F: Fn(&mut T, &Arguments) -> Result<(), InvokeError> + Send + Sync + 'static,
    {
        self.info.methods.push(Self::method_info(name, parameters, f));
        self
    }

    /// Метод, вызываемый при каждом построении
    pub fn import_method<F>(mut self, name: &str, parameters: Vec<ParameterInfo>, f: F) -> Self
    where
        F: Fn(&mut T, &Arguments) -> Result<(), InvokeError> + Send + Sync + 'static,
    {
        let mut method = Self::method_info(name, parameters, f);
        method.is_import = true;
        self.info.methods.push(method);
        self
    }

    /// Тип получен из открытого generic-определения `D`
    pub fn generic<D: ?Sized + 'static>(mut self) -> Self {
        self.info.generic_definition = Some(TypeKey::of::<D>());
        self
    }

    pub fn disposable(mut self) -> Self
    where
        T: Disposable,
    {
        let disposer: Disposer = Arc::new(|value: &Value| {
            if let Some(target) = value.downcast_ref::<T>() {
                target.dispose();
            }
        });
        self.info.disposer = Some(disposer);
        self
    }

    /// Зарегистрировать описание в каталоге
    pub fn build(self) -> &'c TypeCatalog {
        self.catalog.register(self.info)
    }
}
