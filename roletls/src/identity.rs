//! Structured IAM identifiers: ARNs and the two role shapes that may appear
//! in a `GetCallerIdentity` response.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// IAM role and session names share the same character set.
static VALID_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w+=,.@-]+$").expect("Invalid regex"));

/// A parsed `arn:<partition>:<service>:<region>:<account>:<resource>`
/// identifier. All components are opaque strings; equality is
/// component-wise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    pub resource: String,
}

impl Arn {
    pub fn parse(input: &str) -> Result<Arn, Error> {
        let mut parts = input.splitn(6, ':');
        match (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) {
            (
                Some("arn"),
                Some(partition),
                Some(service),
                Some(region),
                Some(account_id),
                Some(resource),
            ) if !resource.is_empty() => Ok(Arn {
                partition: partition.to_string(),
                service: service.to_string(),
                region: region.to_string(),
                account_id: account_id.to_string(),
                resource: resource.to_string(),
            }),
            _ => Err(Error::InvalidArn {
                arn: input.to_string(),
            }),
        }
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account_id, self.resource
        )
    }
}

impl FromStr for Arn {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Arn::parse(input)
    }
}

/// An IAM role, e.g. `arn:aws:iam::123456789012:role/MyRole`.
///
/// Only constructible through validated parsing, so holding a `Role` means
/// the ARN has the right service and a well-formed role name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Role {
    arn: Arn,
}

impl Role {
    pub fn from_arn(arn: Arn) -> Result<Role, Error> {
        if arn.service != "iam" {
            return Err(Error::InvalidRoleArn {
                arn: arn.to_string(),
                reason: format!("service must be \"iam\", got {:?}", arn.service),
            });
        }

        let name = match arn.resource.split_once('/') {
            Some(("role", name)) => name,
            _ => {
                return Err(Error::InvalidRoleArn {
                    arn: arn.to_string(),
                    reason: format!("resource must start with \"role/\", got {:?}", arn.resource),
                })
            }
        };

        if !VALID_NAME.is_match(name) {
            return Err(Error::InvalidRoleArn {
                arn: arn.to_string(),
                reason: format!("role name {name:?} contains invalid characters"),
            });
        }

        Ok(Role { arn })
    }

    pub fn parse(input: &str) -> Result<Role, Error> {
        Role::from_arn(Arn::parse(input)?)
    }

    pub fn arn(&self) -> &Arn {
        &self.arn
    }

    /// The role name without the `role/` prefix.
    pub fn role_name(&self) -> &str {
        self.arn.resource.split_once('/').map(|(_, n)| n).unwrap_or("")
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.arn.fmt(f)
    }
}

/// An STS assumed-role session, e.g.
/// `arn:aws:sts::123456789012:assumed-role/MyRole/session-name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssumedRole {
    arn: Arn,
}

impl AssumedRole {
    pub fn from_arn(arn: Arn) -> Result<AssumedRole, Error> {
        if arn.service != "sts" {
            return Err(Error::InvalidAssumedRoleArn {
                arn: arn.to_string(),
                reason: format!("service must be \"sts\", got {:?}", arn.service),
            });
        }

        let segments: Vec<&str> = arn.resource.splitn(3, '/').collect();
        match segments.as_slice() {
            ["assumed-role", role_name, session_name] => {
                if !VALID_NAME.is_match(role_name) {
                    return Err(Error::InvalidAssumedRoleArn {
                        arn: arn.to_string(),
                        reason: format!("role name {role_name:?} contains invalid characters"),
                    });
                }
                if !VALID_NAME.is_match(session_name) {
                    return Err(Error::InvalidAssumedRoleArn {
                        arn: arn.to_string(),
                        reason: format!(
                            "session name {session_name:?} contains invalid characters"
                        ),
                    });
                }
            }
            _ => {
                return Err(Error::InvalidAssumedRoleArn {
                    arn: arn.to_string(),
                    reason: "resource must have the form \"assumed-role/<role>/<session>\""
                        .to_string(),
                })
            }
        }

        Ok(AssumedRole { arn })
    }

    pub fn parse(input: &str) -> Result<AssumedRole, Error> {
        AssumedRole::from_arn(Arn::parse(input)?)
    }

    pub fn arn(&self) -> &Arn {
        &self.arn
    }

    /// The name of the IAM role this session was minted from.
    pub fn role_name(&self) -> &str {
        self.arn.resource.splitn(3, '/').nth(1).unwrap_or("")
    }

    /// The session name chosen when the role was assumed.
    pub fn session_name(&self) -> &str {
        self.arn.resource.splitn(3, '/').nth(2).unwrap_or("")
    }

    /// The IAM role that minted this session.
    ///
    /// Infallible: the role-name segment was validated at construction, so
    /// the projected role ARN is always well-formed. IAM is a global
    /// service, so the region component is cleared.
    pub fn session_issuer(&self) -> Role {
        Role {
            arn: Arn {
                partition: self.arn.partition.clone(),
                service: "iam".to_string(),
                region: String::new(),
                account_id: self.arn.account_id.clone(),
                resource: format!("role/{}", self.role_name()),
            },
        }
    }
}

impl fmt::Display for AssumedRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.arn.fmt(f)
    }
}

/// Either kind of role identity that can appear in a caller ARN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleKind {
    Role(Role),
    Assumed(AssumedRole),
}

impl RoleKind {
    pub fn parse(input: &str) -> Result<RoleKind, Error> {
        let arn = Arn::parse(input)?;
        match arn.service.as_str() {
            "iam" => Role::from_arn(arn).map(RoleKind::Role),
            "sts" => AssumedRole::from_arn(arn).map(RoleKind::Assumed),
            _ => Err(Error::InvalidArn {
                arn: arn.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_five_arn_components() {
        let arn = Arn::parse("arn:aws:iam::123456789012:role/MyRole").unwrap();
        assert_eq!(arn.partition, "aws");
        assert_eq!(arn.service, "iam");
        assert_eq!(arn.region, "");
        assert_eq!(arn.account_id, "123456789012");
        assert_eq!(arn.resource, "role/MyRole");
        assert_eq!(arn.to_string(), "arn:aws:iam::123456789012:role/MyRole");
    }

    #[test]
    fn resource_may_contain_colons_and_slashes() {
        let arn = Arn::parse("arn:aws:s3:us-east-1:123:bucket/key:version").unwrap();
        assert_eq!(arn.resource, "bucket/key:version");
    }

    #[test]
    fn rejects_malformed_arns() {
        for input in ["", "arn", "arn:aws:iam", "nope:aws:iam::1:role/X", "arn:aws:iam::1:"] {
            assert!(
                matches!(Arn::parse(input), Err(Error::InvalidArn { .. })),
                "expected {input:?} to be rejected"
            );
        }
    }

    #[test]
    fn role_requires_iam_service_and_role_resource() {
        assert!(Role::parse("arn:aws:iam::123456789012:role/MyRole").is_ok());
        assert!(matches!(
            Role::parse("arn:aws:sts::123456789012:role/MyRole"),
            Err(Error::InvalidRoleArn { .. })
        ));
        assert!(matches!(
            Role::parse("arn:aws:iam::123456789012:user/MyUser"),
            Err(Error::InvalidRoleArn { .. })
        ));
        assert!(matches!(
            Role::parse("arn:aws:iam::123456789012:role/bad name"),
            Err(Error::InvalidRoleArn { .. })
        ));
    }

    #[test]
    fn role_name_strips_the_prefix() {
        let role = Role::parse("arn:aws:iam::123456789012:role/app-server@prod").unwrap();
        assert_eq!(role.role_name(), "app-server@prod");
    }

    #[test]
    fn assumed_role_requires_both_segments() {
        assert!(AssumedRole::parse("arn:aws:sts::1:assumed-role/Role/sess").is_ok());
        assert!(matches!(
            AssumedRole::parse("arn:aws:iam::1:assumed-role/Role/sess"),
            Err(Error::InvalidAssumedRoleArn { .. })
        ));
        assert!(matches!(
            AssumedRole::parse("arn:aws:sts::1:assumed-role/RoleOnly"),
            Err(Error::InvalidAssumedRoleArn { .. })
        ));
        // A fourth path segment makes the session-name segment invalid.
        assert!(matches!(
            AssumedRole::parse("arn:aws:sts::1:assumed-role/Role/sess/extra"),
            Err(Error::InvalidAssumedRoleArn { .. })
        ));
    }

    #[test]
    fn session_issuer_projects_to_the_iam_role() {
        let assumed =
            AssumedRole::parse("arn:aws:sts::1234567890:assumed-role/RoleName/roleSession")
                .unwrap();
        assert_eq!(assumed.role_name(), "RoleName");
        assert_eq!(assumed.session_name(), "roleSession");

        let issuer = assumed.session_issuer();
        assert_eq!(issuer.arn().service, "iam");
        assert_eq!(issuer.arn().region, "");
        assert_eq!(issuer.arn().account_id, "1234567890");
        assert_eq!(issuer.arn().resource, "role/RoleName");
        assert_eq!(issuer.to_string(), "arn:aws:iam::1234567890:role/RoleName");
    }

    #[test]
    fn session_issuer_preserves_partition() {
        let assumed =
            AssumedRole::parse("arn:aws-cn:sts::9:assumed-role/R/s").unwrap();
        assert_eq!(assumed.session_issuer().arn().partition, "aws-cn");
    }

    #[test]
    fn role_kind_tags_by_service() {
        assert!(matches!(
            RoleKind::parse("arn:aws:iam::1:role/R"),
            Ok(RoleKind::Role(_))
        ));
        assert!(matches!(
            RoleKind::parse("arn:aws:sts::1:assumed-role/R/s"),
            Ok(RoleKind::Assumed(_))
        ));
        assert!(RoleKind::parse("arn:aws:s3:::bucket").is_err());
    }
}
