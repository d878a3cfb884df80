//! Property tests for handler selection.
//!
//! Routing determinism: for any message, the selected handler is the first
//! registration, in declaration order, whose input type is assignable from
//! the payload type.

use agentflow_core::{Executor, TypeRegistry, ANY_TAG};
use proptest::prelude::*;

fn registry() -> TypeRegistry {
    // int -> number -> scalar
    let mut registry = TypeRegistry::new();
    registry.register_subtype("int", "number");
    registry.register_subtype("number", "scalar");
    registry
}

fn executor_with(tags: &[String]) -> Executor {
    let mut executor = Executor::new("router");
    for tag in tags {
        executor = executor.handler(tag.clone(), |_msg, _ctx| Box::pin(async { Ok(None) }));
    }
    executor
}

proptest! {
    #[test]
    fn first_assignable_registration_wins(
        tags in proptest::collection::vec(
            proptest::sample::select(vec![
                "int".to_string(),
                "number".to_string(),
                "scalar".to_string(),
                "text".to_string(),
                ANY_TAG.to_string(),
            ]),
            1..5,
        ),
        payload in proptest::sample::select(vec![
            "int".to_string(),
            "number".to_string(),
            "text".to_string(),
        ]),
    ) {
        // Registration requires unique input tags per executor.
        let mut unique = Vec::new();
        for tag in tags {
            if !unique.contains(&tag) {
                unique.push(tag);
            }
        }

        let registry = registry();
        let executor = executor_with(&unique);

        let expected = unique
            .iter()
            .find(|tag| registry.is_assignable(&payload, tag));
        let selected = executor
            .select_handler(&payload, &registry)
            .map(|r| &r.input_tag);

        prop_assert_eq!(selected, expected);
    }

    #[test]
    fn selection_is_stable_across_repeated_dispatch(
        payload in proptest::sample::select(vec![
            "int".to_string(),
            "number".to_string(),
        ]),
    ) {
        let registry = registry();
        let tags = vec!["scalar".to_string(), "number".to_string(), ANY_TAG.to_string()];
        let executor = executor_with(&tags);

        let first = executor.select_handler(&payload, &registry).map(|r| r.input_tag.clone());
        for _ in 0..16 {
            let again = executor.select_handler(&payload, &registry).map(|r| r.input_tag.clone());
            prop_assert_eq!(again, first.clone());
        }
    }
}
