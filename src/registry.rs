//! Factory registry: named constructors for every component family
//!
//! Components never expose reflection. Each concrete type instead declares a
//! manifest of members (name, expected type, setter) through
//! [`FactoryConstructible::register_initializers`]; the interpreter checks
//! parameters against that manifest and the registry applies them.
//!
//! The registry is filled during an explicit registration phase
//! ([`FactoryRegistry::builder`]) and is read-only afterwards.

use crate::error::SpecError;
use crate::value::{coerce, MemberType, Value, ValueType};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// An abstract component kind and the trait object its members are built as.
pub trait Family: 'static {
    const NAME: &'static str;
    type Object: ?Sized + Send + Sync + 'static;
}

/// Shared, type-erased handle to a constructed component.
#[derive(Clone)]
pub struct Component {
    family: &'static str,
    type_name: Arc<str>,
    spec: Arc<str>,
    // Always an `Arc<F::Object>` for the family named by `family`.
    object: Arc<dyn Any + Send + Sync>,
}

impl Component {
    pub fn new<F: Family>(type_name: &str, spec: String, object: Arc<F::Object>) -> Self {
        Self {
            family: F::NAME,
            type_name: Arc::from(type_name),
            spec: Arc::from(spec),
            object: Arc::new(object),
        }
    }

    pub fn family(&self) -> &'static str {
        self.family
    }

    /// Registered factory name this component was built by.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Canonical spec text: factory name plus every parameter it was given.
    pub fn spec(&self) -> &str {
        &self.spec
    }

    pub fn downcast<F: Family>(&self) -> Option<Arc<F::Object>> {
        if self.family != F::NAME {
            return None;
        }
        self.object.downcast_ref::<Arc<F::Object>>().cloned()
    }

    /// An owned copy of the object; avoids the clone when this is the last handle.
    pub fn to_owned_object<F>(self) -> Option<F::Object>
    where
        F: Family,
        F::Object: Clone + Sized,
    {
        let shared = self.downcast::<F>()?;
        drop(self);
        Some(Arc::try_unwrap(shared).unwrap_or_else(|shared| (*shared).clone()))
    }

    /// True when both handles refer to the same constructed object.
    pub fn ptr_eq(&self, other: &Component) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("family", &self.family)
            .field("spec", &self.spec)
            .finish()
    }
}

/// Declared member of a factory-constructible type.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberSpec {
    pub name: &'static str,
    pub ty: ValueType,
    pub required: bool,
}

type Setter<T> = Box<dyn Fn(&mut T, Value) -> Result<(), SpecError>>;

/// Assigns one parsed value to one member of a `T`.
pub struct TypedMemberInitializer<T> {
    spec: MemberSpec,
    set: Setter<T>,
    initialized: usize,
}

impl<T> TypedMemberInitializer<T> {
    pub fn spec(&self) -> &MemberSpec {
        &self.spec
    }

    /// How many times this member has been assigned.
    pub fn initialized(&self) -> usize {
        self.initialized
    }

    fn init(&mut self, target: &mut T, value: Value) -> Result<(), SpecError> {
        let value = coerce(value, &self.spec.ty, self.spec.name)?;
        (self.set)(target, value)?;
        self.initialized += 1;
        Ok(())
    }
}

/// The manifest a component type registers, in declaration order.
pub struct Initializers<T> {
    members: Vec<TypedMemberInitializer<T>>,
    positional: Vec<&'static str>,
}

impl<T: 'static> Initializers<T> {
    fn new() -> Self {
        Self {
            members: Vec::new(),
            positional: Vec::new(),
        }
    }

    /// Declare member `name` of Rust type `M`, assigned through `set`.
    pub fn add<M, S>(&mut self, name: &'static str, required: bool, set: S) -> &mut Self
    where
        M: MemberType + 'static,
        S: Fn(&mut T, M) + 'static,
    {
        let expected = M::value_type();
        let setter: Setter<T> = Box::new(move |target: &mut T, value: Value| {
            let got = value.type_name();
            match M::from_value(value) {
                Some(m) => {
                    set(target, m);
                    Ok(())
                }
                None => Err(SpecError::TypeMismatch {
                    member: name.to_string(),
                    expected: M::value_type().to_string(),
                    got,
                }),
            }
        });
        self.members.push(TypedMemberInitializer {
            spec: MemberSpec {
                name,
                ty: expected,
                required,
            },
            set: setter,
            initialized: 0,
        });
        self
    }

    /// Declare the canonical order for positional parameters.
    pub fn positional(&mut self, order: &[&'static str]) -> &mut Self {
        self.positional = order.to_vec();
        self
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut TypedMemberInitializer<T>> {
        self.members.iter_mut().find(|m| m.spec.name == name)
    }
}

/// A concrete type that can be built from spec text.
pub trait FactoryConstructible: Default + 'static {
    type Family: Family;

    fn register_initializers(initializers: &mut Initializers<Self>);

    /// Validate the populated value and turn it into its family's object.
    fn finish(self) -> Result<Arc<<Self::Family as Family>::Object>, SpecError>;
}

type BuildFn = Box<dyn Fn(&str, Vec<(String, Value)>) -> Result<Component, SpecError> + Send + Sync>;

/// One registered factory.
pub struct Registration {
    family: &'static str,
    members: Vec<MemberSpec>,
    positional: Vec<&'static str>,
    build: BuildFn,
}

impl Registration {
    fn of<T: FactoryConstructible>() -> Self {
        let mut manifest = Initializers::<T>::new();
        T::register_initializers(&mut manifest);
        let members = manifest.members.iter().map(|m| m.spec.clone()).collect();
        let positional = manifest.positional.clone();
        Self {
            family: <T::Family as Family>::NAME,
            members,
            positional,
            build: Box::new(build_component::<T>),
        }
    }

    pub fn family(&self) -> &'static str {
        self.family
    }

    pub fn members(&self) -> &[MemberSpec] {
        &self.members
    }

    pub fn member(&self, name: &str) -> Option<&MemberSpec> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Member filled by the `index`-th positional parameter, if declared.
    pub fn positional_member(&self, index: usize) -> Option<&'static str> {
        self.positional.get(index).copied()
    }

    /// Build a component from type-checked `(member, value)` pairs.
    pub fn construct(&self, type_name: &str, params: Vec<(String, Value)>) -> Result<Component, SpecError> {
        (self.build)(type_name, params)
    }
}

fn build_component<T: FactoryConstructible>(
    type_name: &str,
    params: Vec<(String, Value)>,
) -> Result<Component, SpecError> {
    let mut initializers = Initializers::<T>::new();
    T::register_initializers(&mut initializers);

    let spec = render_spec(type_name, &params);
    let mut target = T::default();
    for (member, value) in params {
        let init = initializers
            .find_mut(&member)
            .ok_or_else(|| SpecError::UnknownMember {
                factory: type_name.to_string(),
                member: member.clone(),
                line: 0,
            })?;
        init.init(&mut target, value)?;
    }

    if let Some(missing) = initializers
        .members
        .iter()
        .find(|m| m.spec.required && m.initialized() == 0)
    {
        return Err(SpecError::MissingMember {
            factory: type_name.to_string(),
            member: missing.spec.name.to_string(),
        });
    }

    let object = target.finish()?;
    debug!("constructed {}", spec);
    Ok(Component::new::<T::Family>(type_name, spec, object))
}

fn render_spec(type_name: &str, params: &[(String, Value)]) -> String {
    let args: Vec<String> = params
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect();
    format!("{}({})", type_name, args.join(", "))
}

/// Frozen table of factories, shared by reference with every interpreter.
pub struct FactoryRegistry {
    factories: HashMap<String, Registration>,
}

impl FactoryRegistry {
    pub fn builder() -> FactoryRegistryBuilder {
        FactoryRegistryBuilder {
            factories: HashMap::new(),
        }
    }

    /// Registry holding every component shipped with this crate.
    pub fn with_builtins() -> Result<Self, SpecError> {
        let mut builder = Self::builder();
        register_builtins(&mut builder)?;
        Ok(builder.build())
    }

    pub fn get(&self, name: &str) -> Option<&Registration> {
        self.factories.get(name)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered factory names grouped by family, both sorted.
    pub fn registered(&self) -> BTreeMap<&'static str, Vec<&str>> {
        let mut by_family: BTreeMap<&'static str, Vec<&str>> = BTreeMap::new();
        for (name, reg) in &self.factories {
            by_family.entry(reg.family).or_default().push(name.as_str());
        }
        for names in by_family.values_mut() {
            names.sort_unstable();
        }
        by_family
    }

    /// Human-readable listing of every family and what it can construct.
    pub fn describe(&self) -> String {
        let registered = self.registered();
        let mut out = format!("Number of families: {}.\n", registered.len());
        for (family, names) in registered {
            out.push_str(&format!("Factory<{}> can construct:\n", family));
            for name in names {
                let members: Vec<String> = self.factories[name]
                    .members
                    .iter()
                    .map(|m| {
                        let marker = if m.required { "" } else { "?" };
                        format!("{}{}: {}", m.name, marker, m.ty)
                    })
                    .collect();
                out.push_str(&format!("\t{}({})\n", name, members.join(", ")));
            }
        }
        out
    }
}

pub struct FactoryRegistryBuilder {
    factories: HashMap<String, Registration>,
}

impl FactoryRegistryBuilder {
    pub fn register<T: FactoryConstructible>(&mut self, name: &str) -> Result<&mut Self, SpecError> {
        if self.factories.contains_key(name) {
            return Err(SpecError::DuplicateFactory {
                name: name.to_string(),
            });
        }
        self.factories.insert(name.to_string(), Registration::of::<T>());
        Ok(self)
    }

    pub fn build(self) -> FactoryRegistry {
        FactoryRegistry {
            factories: self.factories,
        }
    }
}

/// Register every built-in component under its public name(s).
pub fn register_builtins(builder: &mut FactoryRegistryBuilder) -> Result<(), SpecError> {
    use crate::features::{ExecutiveExtractor, NgramExtractor, TokenCountExtractor};
    use crate::kernel::{DotProduct, Polynomial, Rbf};
    use crate::model::{KernelPerceptronBuilder, LinearModelBuilder};
    use crate::update::{Decaying, Fixed, Margin, Mira, Misranked};

    builder
        .register::<DotProduct>("Dot")?
        .register::<DotProduct>("DotProduct")?
        .register::<Polynomial>("Polynomial")?
        .register::<Rbf>("Rbf")?
        .register::<LinearModelBuilder>("Linear")?
        .register::<LinearModelBuilder>("PerceptronModel")?
        .register::<KernelPerceptronBuilder>("KernelPerceptron")?
        .register::<Misranked>("Misranked")?
        .register::<Margin>("Margin")?
        .register::<Fixed>("Fixed")?
        .register::<Decaying>("Decaying")?
        .register::<Mira>("Mira")?
        .register::<NgramExtractor>("Ngram")?
        .register::<TokenCountExtractor>("TokenCount")?
        .register::<ExecutiveExtractor>("Executive")?;
    Ok(())
}
