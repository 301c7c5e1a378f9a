use std::fmt::Display;
use std::str::FromStr;

use crate::errors::InputError;

/// Specifies the requested split of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputType {
    Validation,
    Train,
    Test,
}

impl InputType {
    pub const ALL: [InputType; 3] = [InputType::Train, InputType::Validation, InputType::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Validation => "validation",
            InputType::Train => "train",
            InputType::Test => "test",
        }
    }
}

impl Display for InputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InputType {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InputType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| InputError::InputTypeError(s.to_string()))
    }
}
