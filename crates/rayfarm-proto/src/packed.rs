// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Packs color runs as a single CBOR byte string (`r, g, b` per pixel).
//!
//! A full-height column band is millions of pixels; one byte string keeps the
//! payload at exactly three bytes per pixel instead of a nested array per pixel.

use rayfarm_scene::PixelColor;
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserializer, Serializer};
use std::fmt;

pub fn serialize<S>(colors: &[PixelColor], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut flat = Vec::with_capacity(colors.len() * 3);
    for c in colors {
        flat.extend_from_slice(&c.to_array());
    }
    serializer.serialize_bytes(&flat)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<PixelColor>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_bytes(PackedVisitor)
}

struct PackedVisitor;

impl PackedVisitor {
    fn unpack<E: de::Error>(bytes: &[u8]) -> Result<Vec<PixelColor>, E> {
        if bytes.len() % 3 != 0 {
            return Err(E::custom(format!(
                "packed colors length {} is not a multiple of 3",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(3)
            .map(|c| PixelColor::new(c[0], c[1], c[2]))
            .collect())
    }
}

impl<'de> Visitor<'de> for PackedVisitor {
    type Value = Vec<PixelColor>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a byte string of packed rgb triples")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        Self::unpack(v)
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
        Self::unpack(&v)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut flat = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(b) = seq.next_element::<u8>()? {
            flat.push(b);
        }
        Self::unpack(&flat)
    }
}
