//! End-to-end grading runs through a real isolate.

use fieldrunner_core::{AnswerResponse, Sandbox, SandboxConfig};
use serde_json::{json, Value};

fn sandbox() -> Sandbox {
    Sandbox::new(SandboxConfig::default()).unwrap()
}

fn small_heap_sandbox() -> Sandbox {
    Sandbox::new(SandboxConfig::default().with_memory_limit_mb(32)).unwrap()
}

fn student(id: i64, name: &str, fields: Value) -> Value {
    json!({
        "user": {"id": id, "name": name, "real_name": name.to_uppercase()},
        "fields": fields
    })
}

async fn answer(markup: Value, data: Vec<Value>, aliases: Value) -> Value {
    answer_with(&sandbox(), markup, data, aliases).await
}

async fn answer_with(sandbox: &Sandbox, markup: Value, data: Vec<Value>, aliases: Value) -> Value {
    let body = json!({
        "markup": markup,
        "input": {"data": data, "aliases": aliases},
        "taskID": "4.grader"
    });
    let response = sandbox.answer_json(&body.to_string()).await;
    serde_json::to_value(response).unwrap()
}

fn assert_memory_limit_failure(v: &Value) {
    assert!(v.get("savedata").is_none(), "unexpected savedata: {v}");
    let fatal = &v["web"]["fatalError"];
    assert_eq!(fatal["msg"], "Script exceeded the 32 MB memory limit");
    assert!(fatal.get("stackTrace").is_none());
}

#[tokio::test]
async fn test_doubling_with_one_unreadable_value() {
    let program = "const raw = tools.getDouble('raw', NaN);\n\
                   if (!isNaN(raw)) tools.setDouble('score', 2 * raw);";
    let v = answer(
        json!({"program": program}),
        vec![
            student(1, "alice", json!({"4.raw": 3})),
            student(2, "bob", json!({"4.raw": "bad"})),
        ],
        json!({}),
    )
    .await;

    assert!(v["web"].get("fatalError").is_none(), "unexpected fatal: {v}");
    let savedata = v["savedata"].as_array().unwrap();
    assert_eq!(savedata.len(), 2);
    assert_eq!(savedata[0], json!({"user": 1, "fields": {"4.score": 6}}));
    assert_eq!(savedata[1], json!({"user": 2, "fields": {}}));

    let errors = v["web"]["errors"].as_array().unwrap();
    assert_eq!(errors[0]["user"], "bob");
    assert_eq!(errors[0]["errors"].as_array().unwrap().len(), 1);
    assert_eq!(errors[1]["user"], "program");
}

#[tokio::test]
async fn test_infinite_loop_times_out_without_savedata() {
    let v = answer(
        json!({"program": "while (true) {}", "timeout": 50}),
        vec![student(1, "a", json!({}))],
        json!({}),
    )
    .await;
    assert!(v.get("savedata").is_none());
    let msg = v["web"]["fatalError"]["msg"].as_str().unwrap();
    assert!(msg.contains("timed out"), "got {msg}");
    assert!(v["web"]["fatalError"].get("stackTrace").is_none());
}

#[tokio::test]
async fn test_heap_exhaustion_is_generic_failure() {
    let v = answer_with(
        &small_heap_sandbox(),
        json!({
            "program": "const a = []; for (;;) a.push(new Array(1e6).fill(1));",
            "timeout": 10000
        }),
        vec![student(1, "a", json!({}))],
        json!({}),
    )
    .await;
    assert_memory_limit_failure(&v);
}

#[tokio::test]
async fn test_host_output_flood_hits_memory_limit() {
    let program = "const s = 'x'.repeat(1 << 20);\n\
                   for (let i = 0; i < 300; i++) { try { tools.print(s); } catch (e) {} }";
    let v = answer_with(
        &small_heap_sandbox(),
        json!({"program": program, "timeout": 10000}),
        vec![student(1, "a", json!({}))],
        json!({}),
    )
    .await;
    assert_memory_limit_failure(&v);
}

#[tokio::test]
async fn test_aggregator_flood_hits_memory_limit() {
    let v = answer_with(
        &small_heap_sandbox(),
        json!({
            "preprogram": "while (true) gtools.createDistribution('x', 0, 9999);",
            "timeout": 10000
        }),
        vec![student(1, "a", json!({}))],
        json!({}),
    )
    .await;
    assert_memory_limit_failure(&v);
}

#[tokio::test]
async fn test_timed_out_run_frees_its_slot() {
    let sandbox = Sandbox::new(SandboxConfig::default().with_max_concurrent(1)).unwrap();
    let v = answer_with(
        &sandbox,
        json!({"program": "while (true) {}", "timeout": 50}),
        vec![student(1, "a", json!({}))],
        json!({}),
    )
    .await;
    assert!(v["web"]["fatalError"]["msg"].as_str().unwrap().contains("timed out"));

    let v = answer_with(
        &sandbox,
        json!({"program": "tools.setInt('n', 1);"}),
        vec![student(1, "a", json!({}))],
        json!({}),
    )
    .await;
    assert_eq!(v["savedata"][0]["fields"], json!({"4.n": 1}));
    assert_eq!(sandbox.available_slots(), 1);
}

#[tokio::test]
async fn test_empty_program_returns_empty_deltas() {
    let v = answer(
        json!({"program": ""}),
        vec![student(1, "a", json!({"4.x": 1})), student(2, "b", json!({}))],
        json!({}),
    )
    .await;
    assert_eq!(
        v["savedata"],
        json!([{"user": 1, "fields": {}}, {"user": 2, "fields": {}}])
    );
    assert_eq!(v["web"]["output"], "");
    assert_eq!(v["web"]["errors"], json!([]));
}

#[tokio::test]
async fn test_alias_reads_verbatim_and_writes_target() {
    let program = "tools.setInt('pts', tools.getInt('pts') + 1);\ntools.setInt('x', 5);";
    let v = answer(
        json!({"program": program}),
        vec![student(1, "a", json!({"pts": 7, "4.pts": 100}))],
        json!({"pts": "5.points"}),
    )
    .await;
    assert_eq!(
        v["savedata"][0]["fields"],
        json!({"5.points": 8, "4.x": 5})
    );
}

#[tokio::test]
async fn test_thrown_error_is_fatal_with_numbered_source() {
    let program = "tools.print('a');\nthrow new Error('boom');";
    let v = answer(
        json!({"program": program}),
        vec![student(1, "a", json!({}))],
        json!({}),
    )
    .await;
    assert!(v.get("savedata").is_none());
    let fatal = &v["web"]["fatalError"];
    assert_eq!(fatal["msg"], "boom");
    let trace = fatal["stackTrace"].as_str().unwrap();
    assert!(trace.starts_with("Index (2:"), "got {trace}");
    assert!(trace.ends_with("program:\n01: tools.print('a');\n02: throw new Error('boom');\n"));
}

#[tokio::test]
async fn test_syntax_error_reports_parse_message() {
    let v = answer(
        json!({"program": "let x = ;"}),
        vec![student(1, "a", json!({}))],
        json!({}),
    )
    .await;
    let fatal = &v["web"]["fatalError"];
    assert!(fatal["msg"].as_str().unwrap().contains("Unexpected token"));
    assert!(fatal["stackTrace"]
        .as_str()
        .unwrap()
        .ends_with("program:\n01: let x = ;\n"));
}

#[tokio::test]
async fn test_grade_and_credit_from_scale() {
    let program = "const p = tools.getDouble('points');\ntools.saveGrade(tools.getGrade(p), p);";
    let v = answer(
        json!({
            "program": program,
            "gradingScale": {"5": 90, "4": 80, "3": 70},
            "failGrade": "0"
        }),
        vec![
            student(1, "a", json!({"4.points": 85})),
            student(2, "b", json!({"4.points": 12})),
        ],
        json!({}),
    )
    .await;
    assert_eq!(
        v["savedata"][0]["fields"],
        json!({"4.grade": "4", "4.credit": 85})
    );
    assert_eq!(
        v["savedata"][1]["fields"],
        json!({"4.grade": "0", "4.credit": 12})
    );
}

#[tokio::test]
async fn test_phases_share_gtools_and_outdata() {
    let v = answer(
        json!({
            "preprogram": "gtools.s = gtools.createStatCounter('s', 'p');\ngtools.outdata.seen = 0;",
            "program": "gtools.outdata.seen += 1;\ntools.println(tools.getUserName());",
            "postprogram": "gtools.outdata.p = gtools.s.getData().p;\ngtools.print('done');"
        }),
        vec![
            student(1, "a", json!({"4.p": 4})),
            student(2, "b", json!({"4.p": 6})),
        ],
        json!({}),
    )
    .await;
    assert_eq!(v["web"]["output"], "a\nb\ndone\n");
    let outdata = &v["web"]["outdata"];
    assert_eq!(outdata["seen"], json!(2));
    assert_eq!(outdata["p"]["n"], json!(2));
    assert_eq!(outdata["p"]["avg"], json!(5));
}

#[tokio::test]
async fn test_sandbox_globals_are_hidden() {
    let program = "tools.println(typeof Deno, typeof require, typeof process);";
    let v = answer(
        json!({"program": program}),
        vec![student(1, "a", json!({}))],
        json!({}),
    )
    .await;
    assert_eq!(v["web"]["output"], "undefined undefined undefined\n");
}

#[tokio::test]
async fn test_rejections_use_fixed_messages() {
    let response = sandbox().answer_json("not json").await;
    assert!(matches!(response, AnswerResponse::Rejected { .. }));

    let body = json!({
        "markup": {"program": ""},
        "input": {"data": [], "aliases": {}},
        "taskID": "grader"
    });
    let v = serde_json::to_value(sandbox().answer_json(&body.to_string()).await).unwrap();
    assert_eq!(v, json!({"web": {"error": "Taskid missing or incorrect format."}}));
}
