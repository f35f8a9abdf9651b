//! Naming rules for buckets and objects.

/// Punctuation allowed in bucket and object names besides letters and digits
pub const NAME_PUNCTUATION: &[char] = &['-', '.', ',', '#', '+'];

/// Why a name was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("name is shorter than {min} characters")]
    TooShort { min: usize },
    #[error("name is longer than {max} characters")]
    TooLong { max: usize },
    #[error("upper case character '{0}' is not allowed")]
    UpperCase(char),
    #[error("character '{0}' is not allowed")]
    InvalidCharacter(char),
    #[error("'{0}' is a reserved path segment")]
    Reserved(String),
}

/// A rule set a bucket segment or object name has to satisfy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamingConstraints {
    min_length: usize,
    max_length: usize,
    lower_case_only: bool,
    latin1_only: bool,
    punctuation: &'static [char],
}

impl NamingConstraints {
    /// Letters and digits only, between `min_length` and `max_length` characters
    pub const fn alphanumeric(min_length: usize, max_length: usize) -> Self {
        Self {
            min_length,
            max_length,
            lower_case_only: false,
            latin1_only: false,
            punctuation: &[],
        }
    }

    pub const fn lower_case_only(self) -> Self {
        Self {
            lower_case_only: true,
            ..self
        }
    }

    pub const fn limited_to_latin1(self) -> Self {
        Self {
            latin1_only: true,
            ..self
        }
    }

    /// Additionally allow the given punctuation characters
    pub const fn constrained_by(self, punctuation: &'static [char]) -> Self {
        Self {
            punctuation,
            ..self
        }
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn is_lower_case_only(&self) -> bool {
        self.lower_case_only
    }

    pub fn is_latin1_only(&self) -> bool {
        self.latin1_only
    }

    pub fn punctuation(&self) -> &'static [char] {
        self.punctuation
    }

    /// Check a single name (one path segment) against these rules
    pub fn validate(&self, name: &str) -> Result<(), NameError> {
        let length = name.chars().count();
        if length < self.min_length {
            return Err(NameError::TooShort {
                min: self.min_length,
            });
        }
        if length > self.max_length {
            return Err(NameError::TooLong {
                max: self.max_length,
            });
        }
        if name == "." || name == ".." {
            return Err(NameError::Reserved(name.to_string()));
        }

        for c in name.chars() {
            if self.latin1_only && (c as u32) > 0xFF {
                return Err(NameError::InvalidCharacter(c));
            }
            if self.punctuation.contains(&c) {
                continue;
            }
            if !c.is_alphanumeric() {
                return Err(NameError::InvalidCharacter(c));
            }
            if self.lower_case_only && c.is_uppercase() {
                return Err(NameError::UpperCase(c));
            }
        }
        Ok(())
    }
}

/// Rules applied to every bucket path segment and every object name
pub const MANTA_NAMING: NamingConstraints = NamingConstraints::alphanumeric(1, 255)
    .lower_case_only()
    .limited_to_latin1()
    .constrained_by(NAME_PUNCTUATION);
