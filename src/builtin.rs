//! The built-in predicate table and the internal predicates the optimizer
//! may substitute for some of them.

use crate::event::Hint;

pub struct Builtin {
    pub name: &'static str,
    /// construct kinds the predicate's first argument may range over
    pub hints: &'static [Hint],
}

const ALL_STATEMENTS: &[Hint] = &[Hint::Association, Hint::Role, Hint::Name, Hint::Occurrence, Hint::Variant];

pub static BUILTINS: &[Builtin] = &[
    Builtin { name: "association", hints: &[Hint::Association] },
    Builtin { name: "association-role", hints: &[Hint::Association, Hint::Role] },
    Builtin { name: "base-locator", hints: &[] },
    Builtin { name: "datatype", hints: &[Hint::Occurrence, Hint::Variant] },
    Builtin { name: "direct-instance-of", hints: &[] },
    Builtin { name: "instance-of", hints: &[] },
    Builtin { name: "item-identifier", hints: &[] },
    Builtin { name: "literal", hints: &[] },
    Builtin { name: "object-id", hints: &[] },
    Builtin { name: "occurrence", hints: &[Hint::Occurrence] },
    Builtin { name: "reifies", hints: ALL_STATEMENTS },
    Builtin { name: "resource", hints: &[Hint::Occurrence, Hint::Variant] },
    Builtin { name: "role-player", hints: &[Hint::Role] },
    Builtin { name: "scope", hints: &[Hint::Association, Hint::Name, Hint::Occurrence, Hint::Variant] },
    Builtin { name: "source-locator", hints: &[] },
    Builtin { name: "subject-identifier", hints: &[] },
    Builtin { name: "subject-locator", hints: &[] },
    Builtin { name: "topic", hints: &[] },
    Builtin { name: "topic-name", hints: &[Hint::Name] },
    Builtin { name: "topicmap", hints: &[] },
    Builtin { name: "type", hints: &[Hint::Association, Hint::Role, Hint::Name, Hint::Occurrence] },
    Builtin { name: "value", hints: &[Hint::Name, Hint::Occurrence, Hint::Variant] },
    Builtin { name: "value-like", hints: &[Hint::Name, Hint::Occurrence, Hint::Variant] },
    Builtin { name: "variant", hints: &[Hint::Name, Hint::Variant] },
];

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

/// An internal predicate is a built-in with one argument position dropped
/// because the variable there is not used anywhere else.
pub struct Internal {
    pub name: &'static str,
    pub builtin: &'static str,
    /// argument position of the removed variable in the built-in
    pub removed_at: usize,
}

pub static INTERNALS: &[Internal] = &[
    Internal { name: "types", builtin: "instance-of", removed_at: 0 },
    Internal { name: "typed", builtin: "instance-of", removed_at: 1 },
    Internal { name: "direct-types", builtin: "direct-instance-of", removed_at: 0 },
    Internal { name: "direct-typed", builtin: "direct-instance-of", removed_at: 1 },
];

pub fn internal(name: &str) -> Option<&'static Internal> {
    INTERNALS.iter().find(|i| i.name == name)
}

pub fn internal_for(builtin: &str, removed_at: usize) -> Option<&'static Internal> {
    INTERNALS.iter().find(|i| i.builtin == builtin && i.removed_at == removed_at)
}

/// Rebuilds the argument list of the built-in an internal predicate stands
/// for: the removed variables are put back at their original position.
/// Returns the built-in name and its arguments, or `None` for an unknown
/// internal predicate.
pub fn reconstruct<T>(name: &str, mut args: Vec<T>, removed: Vec<T>) -> Option<(&'static str, Vec<T>)> {
    let internal = internal(name)?;
    let mut at = internal.removed_at.min(args.len());
    for arg in removed {
        args.insert(at, arg);
        at += 1;
    }
    Some((internal.builtin, args))
}
