//! Model parameter sets shared by device instances.

use crate::error::Result;
use crate::params::{get_parameter, set_parameter};

use super::bjt::BjtModel;
use super::controls::{CurrentSwitchModel, VoltageSwitchModel};
use super::diode::DiodeModel;
use super::linear::{CapacitorModel, ResistorModel};
use super::mosfet::MosfetModel;

/// A model owned by the circuit and copied into devices when they bind.
#[derive(Debug, Clone)]
pub enum Model {
    Resistor(ResistorModel),
    Capacitor(CapacitorModel),
    Diode(DiodeModel),
    Bjt(BjtModel),
    Mosfet(MosfetModel),
    VoltageSwitch(VoltageSwitchModel),
    CurrentSwitch(CurrentSwitchModel),
}

macro_rules! dispatch {
    ($self:expr, $m:ident => $body:expr) => {
        match $self {
            Model::Resistor($m) => $body,
            Model::Capacitor($m) => $body,
            Model::Diode($m) => $body,
            Model::Bjt($m) => $body,
            Model::Mosfet($m) => $body,
            Model::VoltageSwitch($m) => $body,
            Model::CurrentSwitch($m) => $body,
        }
    };
}

impl Model {
    /// Model name.
    pub fn name(&self) -> &str {
        dispatch!(self, m => &m.name)
    }

    /// Set a model parameter by name.
    pub fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        dispatch!(self, m => set_parameter(m, name, value))
    }

    /// Read a model parameter by name.
    pub fn parameter(&self, name: &str) -> Option<f64> {
        dispatch!(self, m => get_parameter(m, name))
    }
}

/// Typed access to one variant of [`Model`].
pub trait ModelKind: Clone {
    /// Human-readable kind used in error messages
    const KIND: &'static str;

    fn extract(model: &Model) -> Option<&Self>;
}

macro_rules! model_kind {
    ($ty:ty, $variant:ident, $kind:expr) => {
        impl ModelKind for $ty {
            const KIND: &'static str = $kind;

            fn extract(model: &Model) -> Option<&Self> {
                match model {
                    Model::$variant(m) => Some(m),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Model {
            fn from(model: $ty) -> Self {
                Model::$variant(model)
            }
        }
    };
}

model_kind!(ResistorModel, Resistor, "resistor");
model_kind!(CapacitorModel, Capacitor, "capacitor");
model_kind!(DiodeModel, Diode, "diode");
model_kind!(BjtModel, Bjt, "bipolar");
model_kind!(MosfetModel, Mosfet, "mosfet");
model_kind!(VoltageSwitchModel, VoltageSwitch, "voltage switch");
model_kind!(CurrentSwitchModel, CurrentSwitch, "current switch");
