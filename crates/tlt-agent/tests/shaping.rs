//! Property coverage for executor argument shaping.

use proptest::prelude::*;
use serde_json::{Map, Value, json};
use tlt_agent::nodes::executor::shape_arguments;

fn time_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("2030-01-01T18:00:00Z".to_string()),
        Just("2030-01-01T18:00:00+00:00".to_string()),
        Just("2031-06-15T09:30:00-05:00".to_string()),
        Just("next friday".to_string()),
        Just("18:00".to_string()),
        Just("2030-13-45T99:00:00Z".to_string()),
        Just(String::new()),
        "[a-zA-Z0-9 :-]{0,24}",
    ]
}

fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9_ ]{0,16}".prop_map(Value::String),
    ]
}

fn arguments_strategy() -> impl Strategy<Value = Map<String, Value>> {
    let extras = proptest::collection::hash_map("[a-z_]{1,12}", scalar_strategy(), 0..6);
    (time_strategy(), extras, any::<bool>()).prop_map(|(time, extras, with_message_id)| {
        let mut event_data = Map::new();
        event_data.insert("topic".to_string(), json!("Launch"));
        event_data.insert("time".to_string(), json!(time));
        if with_message_id {
            event_data.insert("message_id".to_string(), json!("42"));
        }
        let mut interaction_data = Map::new();
        interaction_data.insert("user_id".to_string(), json!("7"));
        interaction_data.insert("guild_id".to_string(), json!("100"));

        let mut arguments = Map::new();
        arguments.insert("action".to_string(), json!("create_event"));
        arguments.insert("event_data".to_string(), Value::Object(event_data));
        arguments.insert("interaction_data".to_string(), Value::Object(interaction_data));
        for (key, value) in extras {
            // Reserved keys keep their fixed values above.
            if matches!(
                key.as_str(),
                "action" | "event_data" | "interaction_data" | "guild_id" | "metadata"
            ) {
                continue;
            }
            arguments.entry(key).or_insert(value);
        }
        arguments
    })
}

proptest! {
    // Shaped event-manager calls never leak the routing keys.
    #[test]
    fn shaped_arguments_never_carry_action(arguments in arguments_strategy()) {
        let shaped = shape_arguments("event-manager", "create_event", &arguments);
        prop_assert!(!shaped.contains_key("action"));
        prop_assert!(!shaped.contains_key("event_data"));
        prop_assert!(!shaped.contains_key("interaction_data"));
    }

    // start_time is present exactly when the input time parses as ISO-8601.
    #[test]
    fn start_time_present_iff_iso(arguments in arguments_strategy()) {
        let time = arguments["event_data"]["time"].as_str().unwrap_or_default().to_string();
        let shaped = shape_arguments("event-manager", "create_event", &arguments);
        let parses = chrono::DateTime::parse_from_rfc3339(&time).is_ok();
        prop_assert_eq!(shaped.contains_key("start_time"), parses);
        if parses {
            prop_assert_eq!(shaped["start_time"].as_str(), Some(time.as_str()));
        }
    }

    // Core identity fields survive shaping untouched.
    #[test]
    fn identity_fields_survive(arguments in arguments_strategy()) {
        let shaped = shape_arguments("event-manager", "create_event", &arguments);
        prop_assert_eq!(shaped["title"].as_str(), Some("Launch"));
        prop_assert_eq!(shaped["created_by"].as_str(), Some("7"));
        prop_assert_eq!(shaped["guild_id"].as_str(), Some("100"));
        let has_message_id = arguments["event_data"].get("message_id").is_some();
        prop_assert_eq!(shaped.contains_key("event_id"), has_message_id);
    }
}
