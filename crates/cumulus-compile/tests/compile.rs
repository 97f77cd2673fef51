//! End-to-end compile scenarios: parse source, compile against an
//! environment, inspect the resulting template and audit trail.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use cumulus_compile::{
    compile, compile_lenient, compile_normal, CompileError, Definition, Env, Template,
    LENIENT_COMPILE_MODE, NORMAL_COMPILE_MODE,
};
use cumulus_core::{CompositeValue, ParamValue};

fn env_with_defs(defs: Vec<Definition>) -> Env {
    let mut env = Env::new();
    env.lookup = Some(Box::new(move |key| {
        defs.iter().find(|d| d.key() == key).cloned()
    }));
    env
}

fn tpl(source: &str) -> Template {
    Template::parse("01ARZ3NDEKTSV4RRFFQ69G5FAV", source).expect("template should parse")
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn schema_check_accepts_extra_keys() {
    let mut tpl = tpl("create instance image=ami-1 name=foo");
    let mut env = env_with_defs(vec![Definition::new("create", "instance")
        .required(&["image"])
        .extra(&["name", "count"])]);

    compile_normal(&mut tpl, &mut env).unwrap();

    let cmd = tpl.script.commands().next().unwrap();
    assert!(cmd.holes.is_empty());
    assert_eq!(cmd.param("image"), Some(&CompositeValue::literal("ami-1")));
}

#[test]
fn schema_check_rejects_unknown_key() {
    let mut tpl = tpl("create instance image=ami-1 flavor=xl");
    let mut env = env_with_defs(vec![Definition::new("create", "instance")
        .required(&["image"])
        .extra(&["name", "count"])]);

    let err = compile_normal(&mut tpl, &mut env).unwrap_err();
    match err {
        CompileError::UnexpectedParamKey { key, required, extra, .. } => {
            assert_eq!(key, "flavor");
            assert_eq!(required, vec!["image".to_string()]);
            assert_eq!(extra, vec!["name".to_string(), "count".to_string()]);
        }
        other => panic!("expected UnexpectedParamKey, got {:?}", other),
    }
}

#[test]
fn normalized_hole_is_inserted_then_filled() {
    let mut tpl = tpl("create instance name=foo");
    let mut env = env_with_defs(vec![Definition::new("create", "instance")
        .required(&["image"])
        .extra(&["name"])]);
    env.add_fillers([(
        "instance.image".to_string(),
        ParamValue::Str("ami-42".into()),
    )]);

    compile_normal(&mut tpl, &mut env).unwrap();

    let cmd = tpl.script.commands().next().unwrap();
    assert!(cmd.holes.is_empty());
    assert_eq!(cmd.param("image"), Some(&CompositeValue::literal("ami-42")));
    assert_eq!(cmd.param("name"), Some(&CompositeValue::literal("foo")));
    assert_eq!(
        env.processed_fillers(),
        HashMap::from([(
            "instance.image".to_string(),
            Some(ParamValue::Str("ami-42".into()))
        )])
    );
}

#[test]
fn reference_propagation_drops_value_assignment() {
    let mut tpl = tpl("myvpc = 10.0.0.0/16\ncreate subnet cidr=$myvpc");
    let mut env = env_with_defs(vec![Definition::new("create", "subnet").required(&["cidr"])]);

    compile_normal(&mut tpl, &mut env).unwrap();

    assert_eq!(tpl.script.statements.len(), 1);
    let cmd = tpl.script.commands().next().unwrap();
    assert!(cmd.refs.is_empty());
    assert_eq!(
        cmd.param("cidr"),
        Some(&CompositeValue::Literal(ParamValue::Cidr(
            "10.0.0.0/16".into()
        )))
    );
    assert_eq!(
        env.resolved_refs.get("myvpc"),
        Some(&ParamValue::Cidr("10.0.0.0/16".into()))
    );
}

#[test]
fn unresolved_alias_fails_with_sync_hint() {
    let mut tpl = tpl("attach policy name=@admins");
    let mut env = env_with_defs(vec![Definition::new("attach", "policy").required(&["name"])]);
    env.alias_resolver = Some(Box::new(|_, _, _| String::new()));

    let err = compile_normal(&mut tpl, &mut env).unwrap_err();
    assert_eq!(err, CompileError::UnresolvedAliases(vec!["admins".into()]));
    assert_eq!(
        err.to_string(),
        "cannot resolve aliases: [\"admins\"]. Maybe you need to update your local model with `cumulus sync` ?"
    );
}

#[test]
fn duplicate_identifier_is_rejected() {
    let mut tpl = tpl("x = 1\nx = 2");
    let mut env = env_with_defs(vec![]);

    let err = compile_normal(&mut tpl, &mut env).unwrap_err();
    assert_eq!(err, CompileError::DuplicateIdentifier("x".into()));
    assert_eq!(
        err.to_string(),
        "using reference '$x' but 'x' has already been assigned in template"
    );
}

#[test]
fn missing_holes_callback_runs_in_sorted_order() {
    let mut tpl = tpl("create instance image={b} name={a} subnet={c}");
    let mut env = env_with_defs(vec![Definition::new("create", "instance")
        .required(&["image"])
        .extra(&["name", "subnet"])]);

    let order = Rc::new(RefCell::new(Vec::new()));
    let seen = order.clone();
    env.missing_holes = Some(Box::new(move |name| {
        seen.borrow_mut().push(name.to_string());
        Some(ParamValue::Str(format!("v-{}", name)))
    }));

    compile_normal(&mut tpl, &mut env).unwrap();

    assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
    let cmd = tpl.script.commands().next().unwrap();
    assert_eq!(cmd.param("name"), Some(&CompositeValue::literal("v-a")));
    assert_eq!(cmd.param("image"), Some(&CompositeValue::literal("v-b")));
}

#[test]
fn lenient_mode_keeps_unresolved_alias_param() {
    let mut tpl = tpl("attach policy name=@admins");
    let mut env = env_with_defs(vec![Definition::new("attach", "policy").required(&["name"])]);

    compile_lenient(&mut tpl, &mut env).unwrap();

    let cmd = tpl.script.commands().next().unwrap();
    assert_eq!(cmd.param("name"), Some(&CompositeValue::alias("admins")));
    assert_eq!(cmd.to_string(), "attach policy name=@admins");
}

#[test]
fn lenient_mode_keeps_unresolved_holes() {
    let mut tpl = tpl("create instance");
    let mut env = env_with_defs(vec![Definition::new("create", "instance").required(&["image"])]);

    compile_lenient(&mut tpl, &mut env).unwrap();

    let cmd = tpl.script.commands().next().unwrap();
    assert_eq!(
        cmd.holes,
        vec![("image".to_string(), "instance.image".to_string())]
    );
}

#[test]
fn normal_mode_fails_on_remaining_holes() {
    let mut tpl = tpl("create instance");
    let mut env = env_with_defs(vec![Definition::new("create", "instance").required(&["image"])]);

    let err = compile_normal(&mut tpl, &mut env).unwrap_err();
    assert_eq!(
        err,
        CompileError::UnresolvedHoles(vec!["instance.image".into()])
    );
}

#[test]
fn normal_mode_fails_on_surviving_alias_params_without_resolver() {
    let mut tpl = tpl("attach policy name=@admins");
    let mut env = env_with_defs(vec![Definition::new("attach", "policy").required(&["name"])]);

    let err = compile_normal(&mut tpl, &mut env).unwrap_err();
    assert_eq!(
        err,
        CompileError::UnresolvedAliasParams(vec!["@admins".into()])
    );
}

// =============================================================================
// PIPELINE BEHAVIOR
// =============================================================================

#[test]
fn failed_compile_leaves_partial_progress_in_place() {
    // the reference check fails, but the schema pass before it has already
    // normalized holes; the caller still sees that progress
    let mut tpl = tpl("create instance subnet=$nowhere");
    let mut env = env_with_defs(vec![Definition::new("create", "instance")
        .required(&["image"])
        .extra(&["subnet"])]);

    let err = compile_normal(&mut tpl, &mut env).unwrap_err();
    assert_eq!(err, CompileError::UndefinedReference("nowhere".into()));

    let cmd = tpl.script.commands().next().unwrap();
    assert_eq!(
        cmd.holes,
        vec![("image".to_string(), "instance.image".to_string())]
    );
}

#[test]
fn processed_fillers_track_only_consumed_entries() {
    let mut tpl = tpl("create instance image={instance.image}");
    let mut env = env_with_defs(vec![Definition::new("create", "instance").required(&["image"])]);
    env.add_fillers([
        (
            "instance.image".to_string(),
            ParamValue::Str("ami-7".into()),
        ),
        ("unrelated.hole".to_string(), ParamValue::Str("x".into())),
    ]);

    compile_normal(&mut tpl, &mut env).unwrap();

    assert_eq!(
        env.processed_fillers(),
        HashMap::from([(
            "instance.image".to_string(),
            Some(ParamValue::Str("ami-7".into()))
        )])
    );
}

#[test]
fn missing_holes_answers_join_the_audit_trail() {
    let mut tpl = tpl("create keypair name={keypair.name}");
    let mut env = env_with_defs(vec![Definition::new("create", "keypair").required(&["name"])]);
    env.missing_holes = Some(Box::new(|_| Some(ParamValue::Str("my-key".into()))));

    compile_normal(&mut tpl, &mut env).unwrap();

    assert_eq!(
        env.processed_fillers(),
        HashMap::from([(
            "keypair.name".to_string(),
            Some(ParamValue::Str("my-key".into()))
        )])
    );
}

#[test]
fn declined_missing_hole_is_recorded_but_stays_unresolved() {
    let mut tpl = tpl("create keypair name={keypair.name}");
    let mut env = env_with_defs(vec![Definition::new("create", "keypair").required(&["name"])]);
    env.missing_holes = Some(Box::new(|_| None));

    // declining still leaves a trace in the audit trail, and the hole then
    // trips the strict check
    let err = compile_normal(&mut tpl, &mut env).unwrap_err();
    assert_eq!(
        err,
        CompileError::UnresolvedHoles(vec!["keypair.name".into()])
    );
    assert_eq!(
        env.processed_fillers(),
        HashMap::from([("keypair.name".to_string(), None)])
    );
}

#[test]
fn required_keys_are_covered_after_schema_pass() {
    let source = "create instance image=ami-1\ncreate subnet\nk = create keypair";
    let mut tpl = tpl(source);
    let defs = vec![
        Definition::new("create", "instance").required(&["image"]),
        Definition::new("create", "subnet").required(&["cidr", "vpc"]),
        Definition::new("create", "keypair").required(&["name"]),
    ];
    let mut env = env_with_defs(defs.clone());

    // run only the schema pass
    compile(&mut tpl, &mut env, &NORMAL_COMPILE_MODE[..1]).unwrap();

    for cmd in tpl.script.commands() {
        let def = defs.iter().find(|d| d.key() == cmd.definition_key()).unwrap();
        for required in &def.required_params {
            let covered = cmd.param(required).is_some()
                || cmd.has_ref_at(required)
                || cmd.holes.iter().any(|(key, _)| key == required);
            assert!(covered, "required key '{}' not covered on {}", required, cmd);
        }
    }
}

#[test]
fn command_assignments_survive_the_full_pipeline() {
    let source = "inst = create instance image=ami-1\nstart instance id=$inst";
    let mut tpl = tpl(source);
    let mut env = env_with_defs(vec![
        Definition::new("create", "instance").required(&["image"]),
        Definition::new("start", "instance").required(&["id"]),
    ]);

    compile_normal(&mut tpl, &mut env).unwrap();

    assert_eq!(tpl.script.statements.len(), 2);
    // the reference to a command assignment stays symbolic; it resolves at
    // execution time, not compile time
    let start = tpl.script.commands().nth(1).unwrap();
    assert_eq!(start.refs, vec![("id".to_string(), "inst".to_string())]);
}

#[test]
fn list_params_resolve_refs_holes_and_aliases() {
    let source = "sub = sub-123\ncreate loadbalancer subnets=[$sub,{extra.subnet},@backup]";
    let mut tpl = tpl(source);
    let mut env = env_with_defs(vec![
        Definition::new("create", "loadbalancer").required(&["subnets"])
    ]);
    env.add_fillers([(
        "extra.subnet".to_string(),
        ParamValue::Str("sub-456".into()),
    )]);
    env.alias_resolver = Some(Box::new(|_, _, alias| {
        if alias == "backup" {
            "sub-789".to_string()
        } else {
            String::new()
        }
    }));

    compile_normal(&mut tpl, &mut env).unwrap();

    let cmd = tpl.script.commands().next().unwrap();
    match cmd.param("subnets") {
        Some(val) => assert_eq!(
            val.value(),
            Some(ParamValue::List(vec![
                ParamValue::Str("sub-123".into()),
                ParamValue::Str("sub-456".into()),
                ParamValue::Str("sub-789".into()),
            ]))
        ),
        None => panic!("expected subnets param"),
    }
}

#[test]
fn lenient_then_strict_checks_compose() {
    // the two strict passes are ordinary passes; running them alone after a
    // lenient compile reproduces normal mode
    let mut tpl = tpl("create instance");
    let mut env = env_with_defs(vec![Definition::new("create", "instance").required(&["image"])]);

    compile(&mut tpl, &mut env, LENIENT_COMPILE_MODE).unwrap();
    let err = compile(&mut tpl, &mut env, &NORMAL_COMPILE_MODE[7..]).unwrap_err();
    assert_eq!(
        err,
        CompileError::UnresolvedHoles(vec!["instance.image".into()])
    );
}

#[test]
fn compiled_template_renders_to_executable_source() {
    let source = "myvpc = 10.0.0.0/16\ncreate subnet cidr=$myvpc name={subnet.name}";
    let mut tpl = tpl(source);
    let mut env = env_with_defs(vec![Definition::new("create", "subnet")
        .required(&["cidr"])
        .extra(&["name"])]);
    env.add_fillers([("subnet.name".to_string(), ParamValue::Str("private".into()))]);

    compile_normal(&mut tpl, &mut env).unwrap();

    // holes are filled before references propagate, so `name` lands first
    assert_eq!(tpl.to_string(), "create subnet name=private cidr=10.0.0.0/16");
}
