//! Device models for circuit simulation.
//!
//! Every device implements the [`Device`] contract. Families:
//! - Linear: Resistor, Capacitor, Inductor
//! - Sources: independent voltage and current sources with waveforms
//! - Controlled: VCVS, VCCS, CCVS, CCCS
//! - Controls: voltage and current controlled switches
//! - Semiconductors: Diode, BJT, MOSFET level 1
//!
//! Models are plain parameter records owned by the circuit and looked up
//! by name when a device binds.

mod bjt;
mod controlled;
mod controls;
mod device;
mod diode;
mod junction;
mod linear;
mod model;
mod mosfet;
mod sources;
mod waveforms;

pub use bjt::{Bjt, BjtModel, BjtType};
pub use controlled::{Cccs, Ccvs, Vccs, Vcvs};
pub use controls::{CurrentSwitch, CurrentSwitchModel, VoltageSwitch, VoltageSwitchModel};
pub use device::{
    stamp_complex_current, stamp_current, BranchStamp, Device, NoiseSource, Pins, SetupContext,
    Transconductance, TwoTerminal,
};
pub use diode::{Diode, DiodeModel};
pub use junction::{critical_voltage, pnjlim, thermal_voltage};
pub use linear::{Capacitor, CapacitorModel, Inductor, Resistor, ResistorModel};
pub use model::{Model, ModelKind};
pub use mosfet::{Mosfet, MosfetModel, MosfetType};
pub use sources::{CurrentSource, Excitation, VoltageSource};
pub use waveforms::Waveform;
