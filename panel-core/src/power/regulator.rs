//! Supply rails referenced by power-control sequences.
//!
//! The bank remembers the last voltage and current limit it programmed so
//! that repeated sequence steps do not generate redundant bus traffic.

use heapless::Vec;

use crate::error::{HardwareError, PanelError};

/// Maximum number of rails a panel may reference.
pub const MAX_REGULATORS: usize = 6;

/// Index of a rail inside its [`RegulatorBank`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegulatorId(u8);

impl RegulatorId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Platform access to the panel supply rails.
pub trait RegulatorDriver {
    /// Prepares a rail at probe time.
    ///
    /// # Errors
    ///
    /// Returns a [`HardwareError`] when the rail cannot be claimed.
    fn init(&mut self, _id: RegulatorId) -> Result<(), HardwareError> {
        Ok(())
    }

    /// # Errors
    ///
    /// Returns a [`HardwareError`] when the rail does not switch on.
    fn enable(&mut self, id: RegulatorId) -> Result<(), HardwareError>;

    /// # Errors
    ///
    /// Returns a [`HardwareError`] when the rail does not switch off.
    fn disable(&mut self, id: RegulatorId) -> Result<(), HardwareError>;

    /// # Errors
    ///
    /// Returns a [`HardwareError`] when the voltage cannot be programmed.
    fn set_voltage(&mut self, id: RegulatorId, microvolts: u32) -> Result<(), HardwareError>;

    /// # Errors
    ///
    /// Returns a [`HardwareError`] when the limit cannot be programmed.
    fn set_current_limit(&mut self, id: RegulatorId, microamps: u32)
    -> Result<(), HardwareError>;
}

/// Driver for boards whose panel rails are not software controlled.
#[derive(Copy, Clone, Debug, Default)]
pub struct FixedRegulators;

impl RegulatorDriver for FixedRegulators {
    fn enable(&mut self, _id: RegulatorId) -> Result<(), HardwareError> {
        Ok(())
    }

    fn disable(&mut self, _id: RegulatorId) -> Result<(), HardwareError> {
        Ok(())
    }

    fn set_voltage(&mut self, _id: RegulatorId, _microvolts: u32) -> Result<(), HardwareError> {
        Err(HardwareError::Unsupported)
    }

    fn set_current_limit(
        &mut self,
        _id: RegulatorId,
        _microamps: u32,
    ) -> Result<(), HardwareError> {
        Err(HardwareError::Unsupported)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Regulator {
    name: &'static str,
    microvolts: Option<u32>,
    microamps: Option<u32>,
}

/// Named rails plus the driver that switches them.
pub struct RegulatorBank<R> {
    rails: Vec<Regulator, MAX_REGULATORS>,
    driver: R,
}

impl<R: RegulatorDriver> RegulatorBank<R> {
    #[must_use]
    pub const fn new(driver: R) -> Self {
        Self {
            rails: Vec::new(),
            driver,
        }
    }

    /// Builds a bank from a list of rail names.
    ///
    /// # Errors
    ///
    /// Propagates [`RegulatorBank::add`] failures.
    pub fn from_names(driver: R, names: &[&'static str]) -> Result<Self, PanelError> {
        let mut bank = Self::new(driver);
        for name in names {
            bank.add(name)?;
        }
        Ok(bank)
    }

    /// Adds a rail and returns its identifier.
    ///
    /// # Errors
    ///
    /// [`PanelError::InvalidArgument`] for empty or duplicate names,
    /// [`PanelError::RegistryFull`] when the bank is full.
    pub fn add(&mut self, name: &'static str) -> Result<RegulatorId, PanelError> {
        if name.is_empty() || self.find(name).is_some() {
            return Err(PanelError::InvalidArgument);
        }
        let id = u8::try_from(self.rails.len()).map_err(|_| PanelError::RegistryFull)?;
        self.rails
            .push(Regulator {
                name,
                microvolts: None,
                microamps: None,
            })
            .map_err(|_| PanelError::RegistryFull)?;
        Ok(RegulatorId(id))
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<RegulatorId> {
        self.rails
            .iter()
            .position(|rail| rail.name == name)
            .and_then(|index| u8::try_from(index).ok())
            .map(RegulatorId)
    }

    #[must_use]
    pub fn name(&self, id: RegulatorId) -> Option<&'static str> {
        self.rails.get(id.index()).map(|rail| rail.name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rails.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rails.is_empty()
    }

    #[must_use]
    pub fn driver(&self) -> &R {
        &self.driver
    }

    /// Last voltage programmed through the bank.
    #[must_use]
    pub fn cached_voltage(&self, id: RegulatorId) -> Option<u32> {
        self.rails.get(id.index()).and_then(|rail| rail.microvolts)
    }

    /// Claims every rail and forgets cached values.
    ///
    /// Every rail is attempted; the last failure is returned.
    ///
    /// # Errors
    ///
    /// The last [`HardwareError`] reported by the driver.
    pub fn init_all(&mut self) -> Result<(), HardwareError> {
        let mut result = Ok(());
        for index in 0..self.rails.len() {
            let Ok(raw) = u8::try_from(index) else {
                break;
            };
            let id = RegulatorId(raw);
            if let Err(err) = self.driver.init(id) {
                panel_error!("failed to init regulator {}", self.rails[index].name);
                result = Err(err);
            }
            self.rails[index].microvolts = None;
            self.rails[index].microamps = None;
        }
        result
    }

    fn rail_mut(&mut self, id: RegulatorId) -> Result<&mut Regulator, HardwareError> {
        self.rails.get_mut(id.index()).ok_or(HardwareError::Rejected)
    }

    /// # Errors
    ///
    /// Driver failure or unknown rail.
    pub fn enable(&mut self, id: RegulatorId) -> Result<(), HardwareError> {
        self.rail_mut(id)?;
        self.driver.enable(id)
    }

    /// # Errors
    ///
    /// Driver failure or unknown rail.
    pub fn disable(&mut self, id: RegulatorId) -> Result<(), HardwareError> {
        self.rail_mut(id)?;
        self.driver.disable(id)
    }

    /// Programs the voltage unless the rail is already there.
    ///
    /// # Errors
    ///
    /// Driver failure or unknown rail.
    pub fn set_voltage(&mut self, id: RegulatorId, microvolts: u32) -> Result<(), HardwareError> {
        if self.rail_mut(id)?.microvolts == Some(microvolts) {
            return Ok(());
        }
        self.driver.set_voltage(id, microvolts)?;
        self.rail_mut(id)?.microvolts = Some(microvolts);
        Ok(())
    }

    /// Programs the current limit unless the rail is already there.
    ///
    /// # Errors
    ///
    /// Driver failure or unknown rail.
    pub fn set_current_limit(
        &mut self,
        id: RegulatorId,
        microamps: u32,
    ) -> Result<(), HardwareError> {
        if self.rail_mut(id)?.microamps == Some(microamps) {
            return Ok(());
        }
        self.driver.set_current_limit(id, microamps)?;
        self.rail_mut(id)?.microamps = Some(microamps);
        Ok(())
    }
}
