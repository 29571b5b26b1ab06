use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(SessionId, "trk");
branded_id!(ClientId, "client");

/// IMO ship identification number. The stable key for every vessel.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Imo(pub u64);

impl Imo {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for Imo {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Imo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Imo {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_has_prefix() {
        let id = SessionId::new();
        assert!(id.as_str().starts_with("trk_"), "got: {id}");
    }

    #[test]
    fn client_id_has_prefix() {
        let id = ClientId::new();
        assert!(id.as_str().starts_with("client_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique_and_monotonic() {
        let ids: Vec<SessionId> = (0..50).map(|_| SessionId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0].as_str() < w[1].as_str(), "not monotonic: {} >= {}", w[0], w[1]);
        }
    }

    #[test]
    fn imo_is_a_bare_integer_on_the_wire() {
        let json = serde_json::to_string(&vec![Imo(9074729), Imo(42)]).unwrap();
        assert_eq!(json, "[9074729,42]");

        let parsed: Vec<Imo> = serde_json::from_str("[1, 2, 3]").unwrap();
        assert_eq!(parsed, vec![Imo(1), Imo(2), Imo(3)]);
    }

    #[test]
    fn imo_rejects_non_integers() {
        assert!(serde_json::from_str::<Imo>("\"abc\"").is_err());
        assert!(serde_json::from_str::<Imo>("-4").is_err());
    }

    #[test]
    fn imo_parses_from_str() {
        assert_eq!(" 9074729 ".parse::<Imo>().unwrap(), Imo(9074729));
        assert!("x1".parse::<Imo>().is_err());
    }
}
