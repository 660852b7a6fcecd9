//! The closed set of STS regions a signed message may target.

use std::fmt;
use std::str::FromStr;

use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// A recognized STS region. Serialization is closed: unknown region names
/// fail to decode, so a message can never smuggle an arbitrary verification
/// endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    UsEast1,
    UsEast2,
    UsWest1,
    UsWest2,
    EuWest1,
    EuWest2,
    EuWest3,
    EuCentral1,
    EuNorth1,
    EuSouth1,
    EuNortheast1,
    ApSoutheast1,
    ApSoutheast2,
    ApNortheast1,
    ApNortheast2,
    ApNortheast3,
    ApSouth1,
    ApEast1,
    SaEast1,
    CaCentral1,
    MeSouth1,
    AfSouth1,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::UsEast1 => "us-east-1",
            Region::UsEast2 => "us-east-2",
            Region::UsWest1 => "us-west-1",
            Region::UsWest2 => "us-west-2",
            Region::EuWest1 => "eu-west-1",
            Region::EuWest2 => "eu-west-2",
            Region::EuWest3 => "eu-west-3",
            Region::EuCentral1 => "eu-central-1",
            Region::EuNorth1 => "eu-north-1",
            Region::EuSouth1 => "eu-south-1",
            Region::EuNortheast1 => "eu-northeast-1",
            Region::ApSoutheast1 => "ap-southeast-1",
            Region::ApSoutheast2 => "ap-southeast-2",
            Region::ApNortheast1 => "ap-northeast-1",
            Region::ApNortheast2 => "ap-northeast-2",
            Region::ApNortheast3 => "ap-northeast-3",
            Region::ApSouth1 => "ap-south-1",
            Region::ApEast1 => "ap-east-1",
            Region::SaEast1 => "sa-east-1",
            Region::CaCentral1 => "ca-central-1",
            Region::MeSouth1 => "me-south-1",
            Region::AfSouth1 => "af-south-1",
        }
    }

    /// The regional STS endpoint this region's signatures target.
    pub fn sts_endpoint(&self) -> String {
        format!("https://sts.{}.amazonaws.com/", self.as_str())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let region = match input {
            "us-east-1" => Region::UsEast1,
            "us-east-2" => Region::UsEast2,
            "us-west-1" => Region::UsWest1,
            "us-west-2" => Region::UsWest2,
            "eu-west-1" => Region::EuWest1,
            "eu-west-2" => Region::EuWest2,
            "eu-west-3" => Region::EuWest3,
            "eu-central-1" => Region::EuCentral1,
            "eu-north-1" => Region::EuNorth1,
            "eu-south-1" => Region::EuSouth1,
            "eu-northeast-1" => Region::EuNortheast1,
            "ap-southeast-1" => Region::ApSoutheast1,
            "ap-southeast-2" => Region::ApSoutheast2,
            "ap-northeast-1" => Region::ApNortheast1,
            "ap-northeast-2" => Region::ApNortheast2,
            "ap-northeast-3" => Region::ApNortheast3,
            "ap-south-1" => Region::ApSouth1,
            "ap-east-1" => Region::ApEast1,
            "sa-east-1" => Region::SaEast1,
            "ca-central-1" => Region::CaCentral1,
            "me-south-1" => Region::MeSouth1,
            "af-south-1" => Region::AfSouth1,
            other => {
                return Err(Error::InvalidRegion {
                    region: other.to_string(),
                })
            }
        };
        Ok(region)
    }
}

impl Serialize for Region {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Region {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(de::Error::custom)
    }
}
