use std::fmt;

use serde::{de, Deserializer};

/// Accepts either a sequence of strings or a single comma-separated string
/// (as env vars and cli args deliver them), trimming each entry
pub fn deserialize_vec_string<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct CommaSeparated;

    impl<'de> de::Visitor<'de> for CommaSeparated {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a comma-separated string or a sequence of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Vec<String>, E>
        where
            E: de::Error,
        {
            Ok(value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect())
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Vec<String>, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut values = Vec::with_capacity(seq.size_hint().unwrap_or_default());
            while let Some(value) = seq.next_element::<String>()? {
                values.push(value.trim().to_string());
            }
            Ok(values)
        }
    }

    deserializer.deserialize_any(CommaSeparated)
}
