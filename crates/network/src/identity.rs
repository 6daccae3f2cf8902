use libp2p::identity::{DecodingError, Keypair};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

#[must_use]
pub fn generate() -> Keypair {
    Keypair::generate_ed25519()
}

/// Derives the key material from the listen port, so the same port always
/// yields the same peer ID. Never use this outside of debugging.
pub fn deterministic(port: u16) -> Result<Keypair, DecodingError> {
    let mut rng = StdRng::seed_from_u64(u64::from(port));

    let mut secret = [0_u8; 32];
    rng.fill_bytes(&mut secret);

    Keypair::ed25519_from_bytes(secret)
}

/// Persists a keypair as its base58 peer ID next to the base58 protobuf
/// encoding of the key. The peer ID is checked against the key on load.
pub mod serde_identity {
    use libp2p::identity::Keypair;
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Stored {
        peer_id: String,
        keypair: String,
    }

    pub fn serialize<S>(key: &Keypair, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = key.to_protobuf_encoding().map_err(S::Error::custom)?;

        Stored {
            peer_id: key.public().to_peer_id().to_base58(),
            keypair: bs58::encode(encoded).into_string(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Keypair, D::Error>
    where
        D: Deserializer<'de>,
    {
        let stored = Stored::deserialize(deserializer)?;

        let bytes = bs58::decode(&stored.keypair)
            .into_vec()
            .map_err(|err| D::Error::custom(format_args!("keypair is not base58: {err}")))?;

        let keypair = Keypair::from_protobuf_encoding(&bytes)
            .map_err(|err| D::Error::custom(format_args!("undecodable keypair: {err}")))?;

        let derived = keypair.public().to_peer_id().to_base58();

        if stored.peer_id != derived {
            return Err(D::Error::custom(format_args!(
                "peer_id {} does not belong to the stored keypair ({derived})",
                stored.peer_id
            )));
        }

        Ok(keypair)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "serde_identity")]
        identity: Keypair,
    }

    #[test]
    fn deterministic_identity_is_stable_per_port() {
        let first = deterministic(4001).unwrap().public().to_peer_id();
        let again = deterministic(4001).unwrap().public().to_peer_id();
        let other = deterministic(4002).unwrap().public().to_peer_id();

        assert_eq!(first, again, "same port must yield the same peer id");
        assert_ne!(first, other, "different ports must yield different ids");
    }

    #[test]
    fn identity_survives_toml() {
        let identity = generate();
        let peer_id = identity.public().to_peer_id();

        let encoded = toml::to_string(&Wrapper { identity }).unwrap();
        let decoded: Wrapper = toml::from_str(&encoded).unwrap();

        assert_eq!(
            decoded.identity.public().to_peer_id(),
            peer_id,
            "identity should round trip through toml"
        );
    }

    #[test]
    fn mismatched_peer_id_is_rejected() {
        let encoded = toml::to_string(&Wrapper {
            identity: generate(),
        })
        .unwrap();
        let other = generate().public().to_peer_id().to_base58();

        let tampered = encoded
            .lines()
            .map(|line| {
                if line.starts_with("peer_id") {
                    format!("peer_id = \"{other}\"")
                } else {
                    line.to_owned()
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        assert!(
            toml::from_str::<Wrapper>(&tampered).is_err(),
            "tampered peer id must not load"
        );
    }
}
