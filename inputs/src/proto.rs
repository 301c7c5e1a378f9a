//! The subset of the tf.Example protocol buffer messages that image records use,
//! see `tensorflow/core/example/{example,feature}.proto`.
use prost::Message;
use std::collections::BTreeMap;

#[derive(Clone, PartialEq, Message)]
pub struct BytesList {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub value: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FloatList {
    #[prost(float, repeated, tag = "1")]
    pub value: Vec<f32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Int64List {
    #[prost(int64, repeated, tag = "1")]
    pub value: Vec<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Feature {
    #[prost(oneof = "feature::Kind", tags = "1, 2, 3")]
    pub kind: Option<feature::Kind>,
}

pub mod feature {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        BytesList(super::BytesList),
        #[prost(message, tag = "2")]
        FloatList(super::FloatList),
        #[prost(message, tag = "3")]
        Int64List(super::Int64List),
    }
}

/// Features are kept ordered by name, so the encoding of an example is deterministic.
#[derive(Clone, PartialEq, Message)]
pub struct Features {
    #[prost(btree_map = "string, message", tag = "1")]
    pub feature: BTreeMap<String, Feature>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Example {
    #[prost(message, optional, tag = "1")]
    pub features: Option<Features>,
}

impl Feature {
    pub fn int64(value: i64) -> Feature {
        Feature {
            kind: Some(feature::Kind::Int64List(Int64List { value: vec![value] })),
        }
    }

    pub fn bytes(value: Vec<u8>) -> Feature {
        Feature {
            kind: Some(feature::Kind::BytesList(BytesList { value: vec![value] })),
        }
    }

    /// First value of an int64 list.
    pub fn as_int64(&self) -> Option<i64> {
        match &self.kind {
            Some(feature::Kind::Int64List(list)) => list.value.first().copied(),
            _ => None,
        }
    }

    /// First value of a bytes list.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.kind {
            Some(feature::Kind::BytesList(list)) => list.value.first().map(|v| v.as_slice()),
            _ => None,
        }
    }
}

impl Example {
    pub fn from_features<I>(features: I) -> Example
    where
        I: IntoIterator<Item = (String, Feature)>,
    {
        Example {
            features: Some(Features {
                feature: features.into_iter().collect(),
            }),
        }
    }

    pub fn feature(&self, name: &str) -> Option<&Feature> {
        self.features.as_ref().and_then(|f| f.feature.get(name))
    }
}
