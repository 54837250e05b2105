#![forbid(unsafe_code)]

/// Identifier for a unification variable. Allocated in file-disjoint ranges
/// so the link phase can merge per-file substitutions without renaming.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeVarId(pub u32);

/// Index into the compilation unit's capability table; identifies one
/// foreign host module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CapabilityId(pub u32);

/// Identity of one foreign handle's refcount ledger. Every binding holding a
/// copy of the handle records its increments and decrements against the same
/// ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LedgerId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Primitive {
    Int,
    Float,
    Str,
    Bool,
    Unit,
}

impl Primitive {
    pub fn display(self) -> &'static str {
        match self {
            Primitive::Int => "Int",
            Primitive::Float => "Float",
            Primitive::Str => "Str",
            Primitive::Bool => "Bool",
            Primitive::Unit => "Unit",
        }
    }
}

/// The closed type language of the analysis. Every pass matches on this
/// exhaustively; there is no open hierarchy behind it.
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    Primitive(Primitive),
    ListOf(Box<Type>),
    DictOf(Box<Type>, Box<Type>),
    Struct(StructShape),
    Function {
        params: Vec<Type>,
        ret: Box<Type>,
    },
    /// Opaque host value, tagged with the module capability it came from.
    Foreign(CapabilityId),
    Var(TypeVarId),
    /// The gradual-typing escape hatch: unifies with anything.
    Unknown,
}

impl Type {
    pub const INT: Type = Type::Primitive(Primitive::Int);
    pub const FLOAT: Type = Type::Primitive(Primitive::Float);
    pub const STR: Type = Type::Primitive(Primitive::Str);
    pub const BOOL: Type = Type::Primitive(Primitive::Bool);
    pub const UNIT: Type = Type::Primitive(Primitive::Unit);

    pub fn list_of(elem: Type) -> Type {
        Type::ListOf(Box::new(elem))
    }

    pub fn dict_of(key: Type, value: Type) -> Type {
        Type::DictOf(Box::new(key), Box::new(value))
    }

    pub fn function(params: Vec<Type>, ret: Type) -> Type {
        Type::Function {
            params,
            ret: Box::new(ret),
        }
    }

    pub fn display(&self) -> String {
        match self {
            Type::Primitive(p) => p.display().to_string(),
            Type::ListOf(elem) => format!("List<{}>", elem.display()),
            Type::DictOf(key, value) => {
                format!("Dict<{}, {}>", key.display(), value.display())
            }
            Type::Struct(shape) => shape.display(),
            Type::Function { params, ret } => {
                let params_s = params
                    .iter()
                    .map(|t| t.display())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("fn({}) -> {}", params_s, ret.display())
            }
            Type::Foreign(_) => "Foreign".to_string(),
            Type::Var(TypeVarId(id)) => format!("?{id}"),
            Type::Unknown => "any".to_string(),
        }
    }

    /// How the ownership pass treats values of this type.
    pub fn value_class(&self) -> ValueClass {
        match self {
            Type::Primitive(_) | Type::Unknown | Type::Var(_) => ValueClass::Copy,
            Type::ListOf(_) | Type::DictOf(_, _) | Type::Struct(_) | Type::Function { .. } => {
                ValueClass::Move
            }
            Type::Foreign(_) => ValueClass::Refcounted,
        }
    }

    pub fn contains_var(&self, id: TypeVarId) -> bool {
        match self {
            Type::Var(v) => *v == id,
            Type::ListOf(elem) => elem.contains_var(id),
            Type::DictOf(key, value) => key.contains_var(id) || value.contains_var(id),
            Type::Struct(shape) => shape.fields.iter().any(|(_, t)| t.contains_var(id)),
            Type::Function { params, ret } => {
                params.iter().any(|t| t.contains_var(id)) || ret.contains_var(id)
            }
            Type::Primitive(_) | Type::Foreign(_) | Type::Unknown => false,
        }
    }

    pub fn has_vars(&self) -> bool {
        match self {
            Type::Var(_) => true,
            Type::ListOf(elem) => elem.has_vars(),
            Type::DictOf(key, value) => key.has_vars() || value.has_vars(),
            Type::Struct(shape) => shape.fields.iter().any(|(_, t)| t.has_vars()),
            Type::Function { params, ret } => {
                params.iter().any(Type::has_vars) || ret.has_vars()
            }
            Type::Primitive(_) | Type::Foreign(_) | Type::Unknown => false,
        }
    }
}

/// Move discipline of a type. Copy values never change ownership state,
/// Move values transfer on whole-value reads, Refcounted values are foreign
/// handles tracked through a ledger instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueClass {
    Copy,
    Move,
    Refcounted,
}

/// Field layout of a struct type, in declaration order. Compatibility between
/// shapes is structural; the declared name never participates.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct StructShape {
    pub fields: Vec<(String, Type)>,
}

impl StructShape {
    pub fn new(fields: Vec<(String, Type)>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&Type> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn display(&self) -> String {
        let fields_s = self
            .fields
            .iter()
            .map(|(n, t)| format!("{}: {}", n, t.display()))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{{fields_s}}}")
    }
}
