//! Serde adapters bridging the exact-decimal domain to the two wire forms:
//! packed 64-bit words in checkpoints, floating-point approximations in
//! public JSON. Use with `#[serde(with = "crate::serde::packed")]` etc.

/// Decimals as canonical packed 64-bit words (checkpoint form).
pub mod packed {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _, ser::Error as _};

    use crate::decimal::{pack_decimal, unpack_decimal};

    pub fn serialize<S: Serializer>(val: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        let packed = pack_decimal(*val).map_err(S::Error::custom)?;
        serializer.serialize_u64(packed)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        let packed = u64::deserialize(deserializer)?;
        unpack_decimal(packed).map_err(D::Error::custom)
    }
}

/// `Option<Decimal>` as packed words, `None` as null.
pub mod packed_opt {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _, ser::Error as _};

    use crate::decimal::{pack_decimal, unpack_decimal};

    pub fn serialize<S: Serializer>(
        val: &Option<Decimal>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match val {
            Some(val) => {
                let packed = pack_decimal(*val).map_err(S::Error::custom)?;
                serializer.serialize_some(&packed)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Decimal>, D::Error> {
        Option::<u64>::deserialize(deserializer)?
            .map(|packed| unpack_decimal(packed).map_err(D::Error::custom))
            .transpose()
    }
}

/// Decimals as `f64` approximations (public JSON form). Deserialization
/// truncates back into the decimal domain at the default precision.
pub mod approx {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    use crate::decimal::{DEFAULT_DECIMAL_PLACES, decimal_to_f64, f64_to_decimal};

    pub fn serialize<S: Serializer>(val: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(decimal_to_f64(*val))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        let val = f64::deserialize(deserializer)?;
        f64_to_decimal(val, DEFAULT_DECIMAL_PLACES).map_err(D::Error::custom)
    }
}

/// `Option<Decimal>` as `f64` approximations, `None` as null.
pub mod approx_opt {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    use crate::decimal::{DEFAULT_DECIMAL_PLACES, decimal_to_f64, f64_to_decimal};

    pub fn serialize<S: Serializer>(
        val: &Option<Decimal>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match val {
            Some(val) => serializer.serialize_some(&decimal_to_f64(*val)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Decimal>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|val| f64_to_decimal(val, DEFAULT_DECIMAL_PLACES).map_err(D::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Checkpointed {
        #[serde(with = "crate::serde::packed")]
        price: Decimal,
        #[serde(with = "crate::serde::packed_opt")]
        last: Option<Decimal>,
    }

    #[test]
    fn packed_roundtrip_through_json() {
        let original = Checkpointed {
            price: dec!(1.337),
            last: Some(dec!(42)),
        };
        let json = serde_json::to_string(&original).unwrap();
        let restored: Checkpointed = serde_json::from_str(&json).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn packed_roundtrip_through_msgpack() {
        let original = Checkpointed {
            price: dec!(0.00000001),
            last: None,
        };
        let bytes = rmp_serde::to_vec_named(&original).unwrap();
        let restored: Checkpointed = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(original, restored);
    }

    #[derive(Debug, Serialize)]
    struct Public {
        #[serde(with = "crate::serde::approx")]
        price: Decimal,
    }

    #[test]
    fn approx_serializes_as_float() {
        let json = serde_json::to_value(Public { price: dec!(1.5) }).unwrap();
        assert_eq!(json["price"], serde_json::json!(1.5));
    }
}
