/// Logical level of a line: `Active` is 1, `Inactive` is 0.
///
/// For active-low lines the physical level is the inverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineValue {
    Active,
    Inactive,
}

impl LineValue {
    pub const fn new(is_active: bool) -> Self {
        if is_active {
            Self::Active
        } else {
            Self::Inactive
        }
    }

    pub const fn is_active(&self) -> bool {
        matches!(self, LineValue::Active)
    }

    pub const fn as_u8(&self) -> u8 {
        match self {
            LineValue::Active => 1,
            LineValue::Inactive => 0,
        }
    }
}

impl Default for LineValue {
    fn default() -> Self {
        Self::Inactive
    }
}

impl From<bool> for LineValue {
    fn from(value: bool) -> Self {
        Self::new(value)
    }
}

/// Any non-zero value is active.
impl From<u8> for LineValue {
    fn from(value: u8) -> Self {
        Self::new(value != 0)
    }
}

impl From<LineValue> for u8 {
    fn from(value: LineValue) -> Self {
        value.as_u8()
    }
}

impl From<LineValue> for bool {
    fn from(value: LineValue) -> Self {
        value.is_active()
    }
}

impl std::fmt::Display for LineValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_u8().fmt(f)
    }
}
