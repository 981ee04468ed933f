//! Named parameter tables.
//!
//! Every device and model type registers a static table mapping parameter
//! names to accessor functions. Front-ends set parameters by name through
//! [`set_parameter`] and read them back through [`get_parameter`]; nothing is
//! discovered at runtime.

use crate::error::{Result, SimError};

/// A parameter value with a flag recording whether it was set explicitly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Param {
    value: f64,
    given: bool,
}

impl Param {
    /// Create a parameter holding its default value.
    pub const fn new(default: f64) -> Self {
        Self {
            value: default,
            given: false,
        }
    }

    /// Create a parameter that counts as given.
    pub const fn given(value: f64) -> Self {
        Self { value, given: true }
    }

    /// Current value.
    #[inline]
    pub fn get(&self) -> f64 {
        self.value
    }

    /// Set the value and mark the parameter as given.
    pub fn set(&mut self, value: f64) {
        self.value = value;
        self.given = true;
    }

    /// Whether the value was set explicitly.
    pub fn is_given(&self) -> bool {
        self.given
    }

    /// Replace the value without marking it as given.
    pub fn set_default(&mut self, value: f64) {
        if !self.given {
            self.value = value;
        }
    }
}

impl Default for Param {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// One entry of a parameter table.
pub struct ParamDef<T: 'static> {
    /// Lower-case parameter name
    pub name: &'static str,
    /// Short description
    pub info: &'static str,
    pub get: fn(&T) -> f64,
    pub set: fn(&mut T, f64),
}

/// Types exposing a static parameter table.
pub trait Parameterized: Sized + 'static {
    /// The registered parameters.
    fn table() -> &'static [ParamDef<Self>];

    /// Name used in error messages.
    fn entity_name(&self) -> &str;
}

/// Set a parameter by name (case-insensitive).
pub fn set_parameter<T: Parameterized>(target: &mut T, name: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(SimError::invalid_parameter(
            target.entity_name(),
            name,
            "value must be finite",
        ));
    }
    let def = lookup::<T>(name)
        .ok_or_else(|| SimError::unknown_parameter(target.entity_name(), name))?;
    (def.set)(target, value);
    Ok(())
}

/// Read a parameter by name (case-insensitive).
pub fn get_parameter<T: Parameterized>(target: &T, name: &str) -> Option<f64> {
    lookup::<T>(name).map(|def| (def.get)(target))
}

/// Names of all registered parameters.
pub fn parameter_names<T: Parameterized>() -> impl Iterator<Item = &'static str> {
    T::table().iter().map(|def| def.name)
}

fn lookup<T: Parameterized>(name: &str) -> Option<&'static ParamDef<T>> {
    T::table()
        .iter()
        .find(|def| def.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sample {
        name: String,
        gain: Param,
    }

    const SAMPLE_PARAMS: &[ParamDef<Sample>] = &[ParamDef {
        name: "gain",
        info: "Gain",
        get: |s| s.gain.get(),
        set: |s, v| s.gain.set(v),
    }];

    impl Parameterized for Sample {
        fn table() -> &'static [ParamDef<Self>] {
            SAMPLE_PARAMS
        }

        fn entity_name(&self) -> &str {
            &self.name
        }
    }

    #[test]
    fn test_set_marks_given() {
        let mut s = Sample {
            name: "S1".to_string(),
            gain: Param::new(1.0),
        };
        assert!(!s.gain.is_given());
        set_parameter(&mut s, "GAIN", 4.0).unwrap();
        assert!(s.gain.is_given());
        assert_eq!(get_parameter(&s, "gain"), Some(4.0));
    }

    #[test]
    fn test_unknown_parameter() {
        let mut s = Sample {
            name: "S1".to_string(),
            gain: Param::new(1.0),
        };
        let err = set_parameter(&mut s, "bogus", 1.0).unwrap_err();
        assert!(matches!(err, SimError::UnknownParameter { .. }));
        assert_eq!(get_parameter(&s, "bogus"), None);
    }
}
