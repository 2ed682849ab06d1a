//! Property-based tests for parent references, parent resolution and
//! required-output checking.

#![allow(clippy::expect_used)]

use proptest::prelude::*;
use serde_json::Value;

use strata_cli::application::services::resolver::resolve;
use strata_cli::domain::deployment::{ParentRef, validate_name};
use strata_cli::domain::error::{DependencyError, StepError, ValidationError};
use strata_cli::domain::module::ModuleDefinition;
use strata_cli::infra::storage::LocalStorage;

use crate::helpers::{Fixture, Harness, request, with_steps};
use crate::mocks::FakeProvisioner;

const NAME: &str = "[a-z0-9][a-z0-9_.-]{0,15}";

// ============================================================================
// ParentRef / name validation
// ============================================================================

proptest! {
    /// Any pair of valid names parses and prints back unchanged.
    #[test]
    fn prop_parent_ref_round_trips(module in NAME, project in NAME) {
        let text = format!("{module}/{project}");
        let parent: ParentRef = text.parse().expect("valid reference");
        prop_assert_eq!(&parent.module, &module);
        prop_assert_eq!(&parent.project, &project);
        prop_assert_eq!(parent.to_string(), text);
    }

    /// A reference without a separator is rejected.
    #[test]
    fn prop_parent_ref_needs_a_slash(text in "[a-z0-9_.-]{1,20}") {
        let err = text.parse::<ParentRef>().expect_err("no separator");
        let invalid = matches!(err, ValidationError::InvalidParentReference(_));
        prop_assert!(invalid, "expected InvalidParentReference, got {}", err);
    }

    /// Names that could escape a workspace are rejected.
    #[test]
    fn prop_path_like_names_rejected(head in NAME, tail in NAME) {
        let nested = format!("{head}/{tail}");
        let escaping = format!("../{tail}");
        let nested_rejected = validate_name("project", &nested).is_err();
        let escaping_rejected = validate_name("project", &escaping).is_err();
        let empty_rejected = validate_name("project", "").is_err();
        prop_assert!(nested_rejected, "accepted {}", nested);
        prop_assert!(escaping_rejected, "accepted {}", escaping);
        prop_assert!(empty_rejected);
    }
}

// ============================================================================
// resolve() property tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// A module without `depends_on` rejects every parent reference.
    #[test]
    fn prop_unexpected_parent_rejected(module in NAME, project in NAME) {
        let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
        rt.block_on(async {
            let dir = tempfile::TempDir::new().expect("tempdir");
            let storage = LocalStorage::new(dir.path());
            let child = ModuleDefinition::new("app", "/r/app");
            let parent = ParentRef { module, project };

            let err = resolve(&storage, &child, Some(&parent)).await.expect_err("unexpected");
            let unexpected = matches!(
                err.downcast_ref::<DependencyError>(),
                Some(DependencyError::UnexpectedParent { .. })
            );
            prop_assert!(unexpected, "expected UnexpectedParent, got {:#}", err);
            Ok(())
        })?;
    }

    /// A reference to any module other than the declared parent is a mismatch,
    /// checked before storage is consulted.
    #[test]
    fn prop_parent_module_mismatch(module in NAME, project in NAME) {
        prop_assume!(module != "vpc");
        let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
        rt.block_on(async {
            let dir = tempfile::TempDir::new().expect("tempdir");
            let storage = LocalStorage::new(dir.path());
            let mut child = ModuleDefinition::new("app", "/r/app");
            child.depends_on = Some("vpc".into());
            let parent = ParentRef { module: module.clone(), project };

            let err = resolve(&storage, &child, Some(&parent)).await.expect_err("mismatch");
            let mismatch = matches!(
                err.downcast_ref::<ValidationError>(),
                Some(ValidationError::ParentModuleMismatch { expected, found })
                    if expected == "vpc" && *found == module
            );
            prop_assert!(mismatch, "expected ParentModuleMismatch, got {:#}", err);
            Ok(())
        })?;
    }
}

// ============================================================================
// Required outputs
// ============================================================================

const REQUIRED: [&str; 3] = ["db_url", "vpc_id", "zone"];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// The output step fails exactly when a required output is missing, names
    /// every missing output, and writes nothing in that case.
    #[test]
    fn prop_missing_required_outputs_are_all_reported(present in proptest::collection::vec(any::<bool>(), 3)) {
        let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
        rt.block_on(async {
            let fx = Fixture::new();
            let repo = fx.repository(vec![fx.module(
                "db",
                "name: db\n\
                 default_steps: [plan, apply, output]\n\
                 outputs: { db_url: db_url, vpc_id: vpc_id, zone: zone }\n\
                 required_outputs: [db_url, vpc_id, zone]\n",
            )]);
            let produced: Vec<(&str, Value)> = REQUIRED
                .iter()
                .zip(&present)
                .filter(|(_, keep)| **keep)
                .map(|(name, _)| (*name, Value::from("x")))
                .collect();
            let expected_missing: Vec<String> = REQUIRED
                .iter()
                .zip(&present)
                .filter(|(_, keep)| !**keep)
                .map(|(name, _)| (*name).to_string())
                .collect();
            let h = Harness::new(FakeProvisioner::with_outputs(&produced));

            let result = fx
                .run(&h, &repo, &with_steps(request("db", "test"), &["output"]))
                .await;

            if expected_missing.is_empty() {
                prop_assert!(result.is_ok(), "{:?}", result.err());
                prop_assert!(fx.file("db", "test", "outputs.json").is_file());
            } else {
                let err = result.expect_err("missing outputs");
                let reported = match err.downcast_ref::<StepError>() {
                    Some(StepError::MissingRequiredOutput { missing }) => missing.clone(),
                    _ => Vec::new(),
                };
                prop_assert_eq!(reported, expected_missing);
                prop_assert!(!fx.file("db", "test", "outputs.json").exists());
                for name in REQUIRED {
                    prop_assert!(!fx.file("db", "test", name).exists());
                }
            }
            Ok(())
        })?;
    }
}
