//! Declarative validation of submitted build specs.
//!
//! Each job type declares which arguments it needs and what they must look
//! like. Upload credentials are not checked here; the upload job verifies
//! them when it runs.

use regex::Regex;
use std::sync::LazyLock;

use crate::spec::keys;
use crate::{BuildSpec, Error, JobType, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    Optional,
}

/// Constraint on one argument.
#[derive(Debug)]
pub struct FieldRule {
    pub field: &'static str,
    pub requirement: Requirement,
    pub pattern: Option<&'static LazyLock<Regex>>,
}

// Package names as accepted by the AUR.
static AUR_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9@._+-]+$").unwrap());

static BOOL_FLAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(true|false)$").unwrap());

static AUR_RULES: [FieldRule; 2] = [
    FieldRule {
        field: keys::AUR_PACKAGE,
        requirement: Requirement::Required,
        pattern: Some(&AUR_NAME),
    },
    FieldRule {
        field: keys::DISABLE_CCACHE,
        requirement: Requirement::Optional,
        pattern: Some(&BOOL_FLAG),
    },
];

/// Rules for a job type.
pub fn rules_for(job_type: JobType) -> &'static [FieldRule] {
    match job_type {
        JobType::Aur => &AUR_RULES,
    }
}

/// Check `spec` against the rules of its job type.
pub fn validate(spec: &BuildSpec) -> Result<()> {
    for rule in rules_for(spec.job_type) {
        match (spec.args.get(rule.field), rule.requirement) {
            (None, Requirement::Required) => {
                return Err(Error::Validation(format!(
                    "missing required field: {}",
                    rule.field
                )));
            }
            (None, Requirement::Optional) => {}
            (Some(value), _) => {
                let matches = rule.pattern.is_none_or(|pattern| pattern.is_match(value));
                if !matches {
                    return Err(Error::Validation(format!(
                        "invalid value for {}: {:?}",
                        rule.field, value
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BuildArgs, UploadType};

    fn spec(args: BuildArgs) -> BuildSpec {
        BuildSpec {
            job_type: JobType::Aur,
            upload_type: UploadType::LocalStorage,
            args,
        }
    }

    #[test]
    fn test_valid_aur_spec() {
        let args = BuildArgs::new().with(keys::AUR_PACKAGE, "python-requests");
        assert!(validate(&spec(args)).is_ok());
    }

    #[test]
    fn test_missing_package_is_rejected() {
        let err = validate(&spec(BuildArgs::new())).unwrap_err();
        assert!(matches!(err, Error::Validation(msg) if msg.contains("aur_package")));
    }

    #[test]
    fn test_blank_package_is_rejected() {
        let args = BuildArgs::new().with(keys::AUR_PACKAGE, "  ");
        assert!(validate(&spec(args)).is_err());
    }

    #[test]
    fn test_malformed_package_is_rejected() {
        let args = BuildArgs::new().with(keys::AUR_PACKAGE, "../etc/passwd");
        assert!(matches!(validate(&spec(args)), Err(Error::Validation(_))));
    }

    #[test]
    fn test_optional_field_checked_when_present() {
        let args = BuildArgs::new()
            .with(keys::AUR_PACKAGE, "yay")
            .with(keys::DISABLE_CCACHE, "maybe");
        assert!(validate(&spec(args)).is_err());
    }

    #[test]
    fn test_upload_credentials_not_required_at_submission() {
        let args = BuildArgs::new().with(keys::AUR_PACKAGE, "yay");
        let mut spec = spec(args);
        spec.upload_type = UploadType::DataManager;
        assert!(validate(&spec).is_ok());
    }
}
