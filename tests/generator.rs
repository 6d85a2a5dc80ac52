//! End-to-end generator scenarios: extension overrides, determinism,
//! normalization invariants.

use asyncapi_codegen::asyncapi::{Specification, TYPE_OBJECT, TYPE_STRING};
use asyncapi_codegen::codegen::{parse_roles, Generator};
use asyncapi_codegen::error::Error;

fn generate(yaml: &str, roles: &str) -> String {
    let mut spec = Specification::from_yaml(yaml).expect("valid yaml");
    spec.process().expect("normalization");
    Generator::new(spec, "demo", parse_roles(roles).expect("roles"))
        .generate()
        .expect("emission")
}

#[test]
fn test_extension_override_on_scalar_schema() {
    let out = generate(
        r#"
asyncapi: 2.6.0
components:
  schemas:
    flag:
      type: integer
      x-rust-type: u8
"#,
        "types",
    );
    assert!(out.contains("pub type FlagSchema = u8;"), "got:\n{out}");
}

#[test]
fn test_extension_override_inside_required_property() {
    let out = generate(
        r#"
asyncapi: 2.6.0
components:
  schemas:
    object:
      type: object
      required: [flag]
      properties:
        flag:
          type: integer
          x-rust-type: u8
"#,
        "types",
    );
    assert!(out.contains("pub struct ObjectSchema {"), "got:\n{out}");
    assert!(out.contains("pub flag: u8,"), "got:\n{out}");
}

#[test]
fn test_extension_override_on_array_items() {
    let out = generate(
        r#"
asyncapi: 2.6.0
components:
  schemas:
    flags:
      type: array
      items:
        type: integer
        x-rust-type: u8
"#,
        "types",
    );
    assert!(out.contains("pub type FlagsSchema = Vec<u8>;"), "got:\n{out}");
}

const PING_PONG_SPEC: &str = r#"
asyncapi: 2.6.0
info:
  title: Ping service
  version: 1.0.0
channels:
  ping:
    publish:
      message:
        $ref: '#/components/messages/ping'
  pong:
    subscribe:
      message:
        $ref: '#/components/messages/pong'
components:
  messages:
    ping:
      correlationId:
        location: $message.header#/correlationId
      payload:
        type: string
    pong:
      correlationId:
        location: $message.header#/correlationId
      payload:
        type: string
"#;

#[test]
fn test_emission_is_deterministic() {
    let first = generate(PING_PONG_SPEC, "user,application,types");
    let second = generate(PING_PONG_SPEC, "user,application,types");
    assert_eq!(first, second);
}

#[test]
fn test_roles_select_controllers() {
    let types_only = generate(PING_PONG_SPEC, "types");
    assert!(types_only.contains("pub struct PingMessage"));
    assert!(!types_only.contains("pub struct AppController"));
    assert!(!types_only.contains("pub struct UserController"));

    let user = generate(PING_PONG_SPEC, "user,types");
    assert!(user.contains("pub struct UserController"));
    assert!(user.contains("pub async fn publish_ping"));
    // The user receives on the app's subscribe side.
    assert!(user.contains("pub async fn subscribe_pong"));
    assert!(user.contains("pub async fn wait_for_pong"));

    let app = generate(PING_PONG_SPEC, "application,types");
    assert!(app.contains("pub struct AppController"));
    assert!(app.contains("pub async fn subscribe_ping"));
    assert!(app.contains("pub async fn publish_pong"));
}

#[test]
fn test_correlated_message_factory_and_locator() {
    let out = generate(PING_PONG_SPEC, "user,types");
    assert!(out.contains("uuid::Uuid::new_v4()"));
    assert!(out.contains("impl CorrelatedMessage for PingMessage"));
    assert!(out.contains(
        ".with_correlation_locator(\"pong\", CorrelationLocator::header(\"correlationId\"))"
    ));
}

#[test]
fn test_channel_parameters_become_method_arguments() {
    let out = generate(
        r#"
asyncapi: 2.6.0
channels:
  user/{id}/signup:
    subscribe:
      message:
        payload:
          type: string
    parameters:
      id:
        schema:
          type: string
"#,
        "application,types",
    );
    assert!(out.contains("pub async fn publish_user_id_signup("), "got:\n{out}");
    assert!(out.contains("id: &str"), "got:\n{out}");
    assert!(out.contains("&format!(\"user/{id}/signup\")"), "got:\n{out}");
}

#[test]
fn test_one_of_merge_emits_superset() {
    let out = generate(
        r#"
asyncapi: 2.6.0
channels:
  events:
    subscribe:
      message:
        oneOf:
          - $ref: '#/components/messages/created'
          - $ref: '#/components/messages/deleted'
components:
  messages:
    created:
      payload:
        type: object
        properties:
          created_at:
            type: string
    deleted:
      payload:
        type: object
        properties:
          deleted_at:
            type: string
"#,
        "types",
    );
    // The superset channel message carries every branch's fields.
    assert!(out.contains("pub struct EventsPayload {"), "got:\n{out}");
    assert!(out.contains("pub created_at: Option<String>,"), "got:\n{out}");
    assert!(out.contains("pub deleted_at: Option<String>,"), "got:\n{out}");
}

#[test]
fn test_one_of_conflict_is_rejected() {
    let mut spec = Specification::from_yaml(
        r#"
asyncapi: 2.6.0
channels:
  events:
    subscribe:
      message:
        oneOf:
          - payload:
              type: object
              properties:
                stamp:
                  type: string
          - payload:
              type: object
              properties:
                stamp:
                  type: integer
"#,
    )
    .expect("valid yaml");
    assert!(matches!(spec.process(), Err(Error::SchemaConflict { .. })));
}

#[test]
fn test_correlation_tree_reachable_after_normalization() {
    let mut spec = Specification::from_yaml(
        r#"
asyncapi: 2.6.0
channels:
  replies:
    subscribe:
      message:
        correlationId:
          location: $message.payload#/meta/tracking/id
        payload:
          type: object
"#,
    )
    .expect("valid yaml");
    spec.process().expect("normalization");

    let message = spec.channels["replies"]
        .subscribe
        .as_ref()
        .unwrap()
        .message
        .as_ref()
        .unwrap();
    let payload = message.payload.as_ref().expect("payload");
    let meta = &payload.properties["meta"];
    assert_eq!(meta.schema_type, TYPE_OBJECT);
    let tracking = &meta.properties["tracking"];
    assert_eq!(tracking.schema_type, TYPE_OBJECT);
    assert_eq!(tracking.properties["id"].schema_type, TYPE_STRING);
}

#[test]
fn test_normalization_idempotent_through_emission() {
    let mut spec = Specification::from_yaml(PING_PONG_SPEC).expect("valid yaml");
    spec.process().expect("first normalization");
    let roles = parse_roles("user,application,types").expect("roles");
    let once = Generator::new(spec.clone(), "demo", roles.clone())
        .generate()
        .expect("emission");

    spec.process().expect("second normalization");
    let twice = Generator::new(spec, "demo", roles).generate().expect("emission");
    assert_eq!(once, twice);
}
