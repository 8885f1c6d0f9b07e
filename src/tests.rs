use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{json, Value};

use crate::*;

// ── Shared fixture runner ───────────────────────────────────────────

/// Embed fixture files at compile time.
const RENDER_FIXTURES: &str = include_str!("../test-data/fixtures/render.json");

fn codes(app: &App) -> Vec<&'static str> {
    app.diagnostics().iter().map(|d| d.code).collect()
}

#[test]
fn test_fixture_render() {
    let fixtures: Vec<Value> = serde_json::from_str(RENDER_FIXTURES).unwrap();

    for fixture in &fixtures {
        let name = fixture["name"].as_str().unwrap();
        let markup = fixture["markup"].as_str().unwrap();
        let expected = fixture["expected"].as_str().unwrap();
        let config = match fixture.get("config") {
            Some(c) => Config::from_json(&c.to_string()).unwrap(),
            None => Config::default(),
        };
        let expected_codes: Vec<&str> = fixture
            .get("diagnostics")
            .and_then(|d| d.as_array())
            .map(|d| d.iter().map(|c| c.as_str().unwrap()).collect())
            .unwrap_or_default();

        let mut app = App::with_config(fixture["state"].clone(), config);
        app.mount_markup(markup)
            .unwrap_or_else(|e| panic!("Fixture '{}': mount failed: {}", name, e));
        assert_eq!(app.render().unwrap(), expected, "Fixture '{}'", name);
        assert_eq!(codes(&app), expected_codes, "Fixture '{}': diagnostics", name);
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn mount(state: Value, markup: &str) -> App {
    let mut app = App::new(state);
    app.mount_markup(markup).unwrap();
    app
}

fn by_id(app: &App, id: &str) -> NodeId {
    app.document()
        .get_element_by_id(id)
        .unwrap_or_else(|| panic!("no element with id '{}'", id))
}

fn item_texts(app: &App, list: &str) -> Vec<String> {
    let doc = app.document();
    doc.child_elements(by_id(app, list))
        .into_iter()
        .map(|n| doc.text_content(n))
        .collect()
}

// ── Dispatch ────────────────────────────────────────────────────────

#[test]
fn test_bind_write_is_idempotent() {
    let mut app = mount(
        json!({"name": "a", "other": 1}),
        r#"<input id="in" ba-bind="name"><input ba-bind="other">"#,
    );
    let input = by_id(&app, "in");
    assert_eq!(app.document().value(input), "a");

    let before = app.document().writes();
    assert!(app.get_data().set("root.name", json!("b")).unwrap());
    assert_eq!(app.document().writes(), before + 1);
    assert_eq!(app.document().value(input), "b");

    assert!(!app.get_data().set("root.name", json!("b")).unwrap());
    assert_eq!(app.document().writes(), before + 1);
}

#[test]
fn test_composite_replacement_updates_every_leaf() {
    let mut app = mount(
        json!({"user": {"name": "Z", "age": 1}}),
        r#"<p id="name">{{root.user.name}}</p><input id="age" ba-bind="root.user.age">"#,
    );
    app.get_data()
        .set("root.user", json!({"name": "A", "age": 9}))
        .unwrap();
    assert_eq!(app.document().text_content(by_id(&app, "name")), "A");
    assert_eq!(app.document().value(by_id(&app, "age")), "9");
}

#[test]
fn test_show_hide_follow_state() {
    let mut app = mount(
        json!({"user": {"admin": false}}),
        r#"<p id="s" ba-show="user.admin">admin</p><p id="h" ba-hide="user.admin">guest</p>"#,
    );
    let (s, h) = (by_id(&app, "s"), by_id(&app, "h"));
    assert!(app.document().is_hidden(s));
    assert!(!app.document().is_hidden(h));

    app.get_data().set("user", json!({"admin": true})).unwrap();
    assert!(!app.document().is_hidden(s));
    assert!(app.document().is_hidden(h));
}

#[test]
fn test_expressions_track_their_dependencies() {
    let mut app = mount(
        json!({"a": 1, "b": 2, "c": 0}),
        r#"<p id="sum">{{a + b}}</p><p id="c">{{c}}</p>"#,
    );
    app.get_data().set("b", json!(40)).unwrap();
    assert_eq!(app.document().text_content(by_id(&app, "sum")), "41");
    let before = app.document().writes();
    app.get_data().set("c", json!(0)).unwrap();
    assert_eq!(app.document().writes(), before);
}

// ── Templates ───────────────────────────────────────────────────────

const LIST: &str = r#"<ul id="list"><li ba-foreach="item in items">{{item}}</li></ul>"#;

#[test]
fn test_foreach_initial_render() {
    let app = mount(json!({"items": ["a", "b"]}), LIST);
    let doc = app.document();
    let children = doc.child_elements(by_id(&app, "list"));
    assert_eq!(children.len(), 2);
    assert_eq!(doc.attribute(children[0], "ba-path"), Some("items[0]"));
    assert_eq!(doc.attribute(children[1], "ba-path"), Some("items[1]"));
    assert_eq!(item_texts(&app, "list"), vec!["a", "b"]);
}

#[test]
fn test_push_appends_one_item_in_place() {
    let mut app = mount(json!({"items": ["a", "b"]}), LIST);
    let before = app.document().child_elements(by_id(&app, "list"));

    assert_eq!(app.get_data().push("items", vec![json!("c")]).unwrap(), 3);

    let after = app.document().child_elements(by_id(&app, "list"));
    assert_eq!(after.len(), 3);
    assert_eq!(after[..2], before[..]);
    assert_eq!(app.document().attribute(after[2], "ba-path"), Some("items[2]"));
    assert_eq!(item_texts(&app, "list"), vec!["a", "b", "c"]);
}

#[test]
fn test_removal_rebuilds() {
    let mut app = mount(json!({"items": ["a", "b", "c"]}), LIST);
    let before = app.document().child_elements(by_id(&app, "list"));

    let removed = app.get_data().splice("items", 1, 1, vec![]).unwrap();
    assert_eq!(removed, vec![json!("b")]);
    let after = app.document().child_elements(by_id(&app, "list"));
    assert_eq!(after.len(), 2);
    assert!(!after.contains(&before[0]));
    assert_eq!(item_texts(&app, "list"), vec!["a", "c"]);

    app.get_data().pop("items").unwrap();
    app.get_data().shift("items").unwrap();
    assert!(app.document().child_elements(by_id(&app, "list")).is_empty());

    app.get_data().unshift("items", vec![json!("x"), json!("y")]).unwrap();
    assert_eq!(item_texts(&app, "list"), vec!["x", "y"]);
}

#[test]
fn test_array_replacement_and_item_write() {
    let mut app = mount(json!({"items": ["a"]}), LIST);
    app.get_data().set("items", json!(["p", "q"])).unwrap();
    assert_eq!(item_texts(&app, "list"), vec!["p", "q"]);
    app.get_data().set("items[1]", json!("Q")).unwrap();
    assert_eq!(item_texts(&app, "list"), vec!["p", "Q"]);
}

#[test]
fn test_rebuild_keeps_sibling_content() {
    let mut app = mount(
        json!({"items": ["a"]}),
        r#"<ul id="list"><li id="head">head</li><li ba-foreach="item in items">{{item}}</li></ul>"#,
    );
    app.get_data().push("items", vec![json!("b")]).unwrap();
    app.get_data().splice("items", 0, 1, vec![]).unwrap();
    assert_eq!(item_texts(&app, "list"), vec!["head", "b"]);
}

#[test]
fn test_rebuilds_free_replaced_items() {
    let mut app = mount(json!({"items": ["a", "b", "c"]}), LIST);
    let before = app.document().len();
    for _ in 0..200 {
        app.get_data().splice("items", 0, 1, vec![json!("a")]).unwrap();
    }
    assert_eq!(app.document().len(), before);
    assert_eq!(item_texts(&app, "list"), vec!["a", "b", "c"]);
}

#[test]
fn test_falsy_values_clear_a_text_control() {
    let mut app = mount(json!({"n": 5}), r#"<input id="n" ba-bind="n">"#);
    let input = by_id(&app, "n");
    assert_eq!(app.document().value(input), "5");
    app.get_data().set("n", json!(0)).unwrap();
    assert_eq!(app.document().value(input), "");
}

#[test]
fn test_item_bindings_and_input() {
    let mut app = mount(
        json!({"people": [{"name": "Ada"}, {"name": "Alan"}]}),
        r#"<div id="list"><p ba-foreach="person in people"><input id="name" ba-bind="person.name"><span>{{person.name}}</span></p></div>"#,
    );
    let second = by_id(&app, "name-1");
    assert_eq!(app.document().value(second), "Alan");
    assert_eq!(app.document().attribute(second, "ba-bind"), Some("people[1].name"));

    app.input(second, "Grace").unwrap();
    assert_eq!(app.get_path_data("people[1].name"), Some(json!("Grace")));
    assert_eq!(item_texts(&app, "list"), vec!["Ada", "Grace"]);
}

#[test]
fn test_nested_foreach() {
    let mut app = mount(
        json!({"groups": [
            {"name": "g1", "tags": ["x", "y"]},
            {"name": "g2", "tags": ["z"]}
        ]}),
        r#"<div id="groups"><section ba-foreach="g in groups"><h2>{{g.name}}</h2><ul><li ba-foreach="t in g.tags">{{g.name}}:{{t}}#{{index}}</li></ul></section></div>"#,
    );
    let doc = app.document();
    let sections = doc.child_elements(by_id(&app, "groups"));
    assert_eq!(sections.len(), 2);
    let lists: Vec<NodeId> = sections.iter().map(|s| doc.child_elements(*s)[1]).collect();
    let texts = |app: &App, list: NodeId| -> Vec<String> {
        let doc = app.document();
        doc.child_elements(list)
            .into_iter()
            .map(|n| doc.text_content(n))
            .collect()
    };
    assert_eq!(texts(&app, lists[0]), vec!["g1:x#0", "g1:y#1"]);
    assert_eq!(texts(&app, lists[1]), vec!["g2:z#0"]);

    app.get_data().push("groups[0].tags", vec![json!("w")]).unwrap();
    assert_eq!(texts(&app, lists[0]), vec!["g1:x#0", "g1:y#1", "g1:w#2"]);

    app.get_data().set("groups[1].name", json!("G2")).unwrap();
    assert_eq!(texts(&app, lists[1]), vec!["G2:z#0"]);

    // Replacing the outer array rebuilds both levels.
    app.get_data()
        .set("groups", json!([{"name": "only", "tags": []}]))
        .unwrap();
    let doc = app.document();
    let sections = doc.child_elements(by_id(&app, "groups"));
    assert_eq!(sections.len(), 1);
    assert_eq!(doc.text_content(sections[0]), "only");
    assert!(codes(&app).is_empty());
}

// ── Events ──────────────────────────────────────────────────────────

#[test]
fn test_checkbox_round_trip() {
    let mut app = mount(
        json!({"flags": {"active": false}}),
        r#"<input id="cb" type="checkbox" ba-bind="root.flags.active">"#,
    );
    let cb = by_id(&app, "cb");
    assert!(!app.document().checked(cb));

    app.set_checked(cb, true).unwrap();
    assert_eq!(app.get_path_data("root.flags.active"), Some(json!(true)));
    assert!(app.document().checked(cb));

    app.get_data().set("flags.active", json!(false)).unwrap();
    assert!(!app.document().checked(cb));
}

#[test]
fn test_radio_writes_only_when_checked() {
    let mut app = mount(
        json!({"color": "red"}),
        r#"<input id="r" type="radio" value="red" ba-bind="color"><input id="b" type="radio" value="blue" ba-bind="color">"#,
    );
    let (r, b) = (by_id(&app, "r"), by_id(&app, "b"));
    assert!(app.document().checked(r));

    app.set_checked(b, true).unwrap();
    assert_eq!(app.get_path_data("color"), Some(json!("blue")));
    assert!(!app.document().checked(r));

    app.set_checked(b, false).unwrap();
    assert_eq!(app.get_path_data("color"), Some(json!("blue")));
}

#[test]
fn test_click_in_item_passes_the_item() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut app = App::new(json!({"items": ["a", "b"]}));
    let sink = Rc::clone(&seen);
    app.add_handler("remove", move |scope, args| {
        let HandlerArg::Value(Some(item)) = &args[0] else {
            panic!("expected a value, got {:?}", args);
        };
        sink.borrow_mut().push(item.clone());
        let path = Path::parse("items").unwrap();
        let index = scope
            .get("items")
            .and_then(|v| v.as_array())
            .and_then(|items| items.iter().position(|i| i == item))
            .unwrap();
        scope.store().splice(&path, index, 1, vec![]).unwrap();
    });
    app.mount_markup(
        r#"<ul id="list"><li ba-foreach="item in items">{{item}}<button ba-click="remove(item)">x</button></li></ul>"#,
    )
    .unwrap();

    let button = by_id(&app, "item-0");
    app.click(button).unwrap();
    assert_eq!(*seen.borrow(), vec![json!("a")]);
    assert_eq!(app.get_path_data("items"), Some(json!(["b"])));
    assert_eq!(item_texts(&app, "list"), vec!["bx"]);
    assert!(codes(&app).is_empty());
}

#[test]
fn test_click_arguments() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut app = App::new(json!({"user": {"name": "Ada"}, "items": [{"id": 7}]}));
    let sink = Rc::clone(&seen);
    app.add_handler("show", move |_, args| sink.borrow_mut().push(args.to_vec()));
    app.mount_markup(
        r#"<button id="top" ba-click="show(user.name, event, missing)">x</button><ul><li ba-foreach="it in items"><b ba-click="show(it.id, other)">y</b><i ba-click="nope()">z</i></li></ul>"#,
    )
    .unwrap();

    let top = by_id(&app, "top");
    app.click(top).unwrap();
    app.click(by_id(&app, "it-0")).unwrap();

    let seen = seen.borrow();
    assert_eq!(
        seen[0],
        vec![
            HandlerArg::Value(Some(json!("Ada"))),
            HandlerArg::Event(ClickEvent { target: top }),
            HandlerArg::Value(None),
        ]
    );
    assert_eq!(
        seen[1],
        vec![
            HandlerArg::Value(Some(json!(7))),
            HandlerArg::Value(Some(json!({"id": 7}))),
        ]
    );
    assert_eq!(codes(&app), vec!["click-argument-mismatch"]);
}

#[test]
fn test_missing_and_invalid_handlers() {
    let mut app = mount(
        json!({}),
        r#"<button id="a" ba-click="nobody()">x</button><button id="b" ba-click="not a call">y</button>"#,
    );
    assert_eq!(codes(&app), vec!["invalid-click"]);
    app.click(by_id(&app, "a")).unwrap();
    app.click(by_id(&app, "b")).unwrap();
    assert_eq!(codes(&app), vec!["invalid-click", "handler-not-found"]);
}

#[test]
fn test_bind_handler_receives_both_directions() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut app = App::new(json!({"price": 5}));
    let sink = Rc::clone(&calls);
    app.add_handler("money", move |scope, args| {
        match (&args[0], &args[2]) {
            (HandlerArg::Text(op), HandlerArg::Value(Some(v))) if op == "SET_UI" => {
                let HandlerArg::Node(node) = args[1] else { panic!() };
                let text = format!("${}", v);
                scope.document_mut().set_value(node, &text);
            }
            (HandlerArg::Text(op), HandlerArg::Path(path)) if op == "SET_DATA" => {
                let HandlerArg::Node(node) = args[1] else { panic!() };
                let raw = scope.document().value(node);
                let n: f64 = raw.trim_start_matches('$').parse().unwrap();
                scope.store().set(path, json!(n)).unwrap();
            }
            other => panic!("unexpected call {:?}", other),
        }
        sink.borrow_mut().push(args[0].clone());
    });
    app.mount_markup(r#"<input id="p" ba-bind="price" ba-bind-handler="money(price)">"#)
        .unwrap();
    let input = by_id(&app, "p");
    assert_eq!(app.document().value(input), "$5");

    app.input(input, "$7.5").unwrap();
    assert_eq!(app.get_path_data("price"), Some(json!(7.5)));
    assert_eq!(app.document().value(input), "$7.5");
    assert_eq!(
        *calls.borrow(),
        vec![
            HandlerArg::Text("SET_UI".into()),
            HandlerArg::Text("SET_DATA".into()),
            HandlerArg::Text("SET_UI".into()),
        ]
    );
}

#[test]
fn test_runaway_handlers_are_capped() {
    let config = Config {
        max_dispatch: 5,
        ..Config::default()
    };
    let mut app = App::with_config(json!({"n": 0}), config);
    app.add_handler("bump", |scope, args| {
        if let HandlerArg::Value(Some(v)) = &args[2] {
            let next = v.as_i64().unwrap_or(0) + 1;
            scope.set("n", json!(next)).unwrap();
        }
    });
    app.mount_markup(r#"<input ba-bind="n" ba-bind-handler="bump">"#)
        .unwrap();
    assert_eq!(codes(&app), vec!["dispatch-overflow"]);
    assert_eq!(app.get_path_data("n"), Some(json!(6)));
}

#[test]
fn test_events_on_unknown_nodes() {
    let mut app = mount(json!({}), "<p>x</p>");
    assert!(matches!(app.click(NodeId(999)), Err(BindError::UnknownNode(999))));
    let text = app.document().children(app.document().child_elements(app.document().root())[0])[0];
    assert!(app.input(text, "x").is_err());
}

// ── State surface ───────────────────────────────────────────────────

#[test]
fn test_subscriptions_and_flatten() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut app = mount(json!({"user": {"name": "A"}, "n": 1}), "<p>{{n}}</p>");
    let sink = Rc::clone(&seen);
    let id = app
        .subscribe("root.user", move |m| sink.borrow_mut().push((m.path.to_string(), m.key.clone())))
        .unwrap();
    app.get_data().set("user.name", json!("B")).unwrap();
    app.get_data().set("n", json!(2)).unwrap();
    assert_eq!(*seen.borrow(), vec![("root.user.name".to_string(), "name".to_string())]);
    assert!(app.unsubscribe(id));

    let flat = app.flatten();
    assert_eq!(flat.get("root.user.name"), Some(&json!("B")));
    assert_eq!(flat.get("root.n"), Some(&json!(2)));
}

#[test]
fn test_identity_stamping() {
    let config = Config {
        identity: true,
        ..Config::default()
    };
    let mut app = App::with_config(json!({"user": {"name": "A"}, "items": []}), config);
    app.mount_markup("<p>{{user.name}}</p>").unwrap();
    assert_eq!(app.get_path_data("baId"), Some(json!(1)));
    assert_eq!(app.get_path_data("user.baId"), Some(json!(2)));
    app.get_data().push("items", vec![json!({"x": 1})]).unwrap();
    assert_eq!(app.get_path_data("items[0].baId"), Some(json!(3)));
    assert!(app.get_path_data("items.baId").is_none());
}

#[test]
fn test_length_write_is_silent() {
    let mut app = mount(json!({"items": ["a", "b", "c"]}), LIST);
    let before = app.document().writes();
    app.get_data().set("items.length", json!(1)).unwrap();
    assert_eq!(app.get_path_data("items"), Some(json!(["a"])));
    assert_eq!(app.document().writes(), before);
    assert_eq!(item_texts(&app, "list").len(), 3);
}

#[test]
fn test_hard_errors() {
    let mut app = App::new(json!({"items": [], "s": "x"}));
    assert!(matches!(app.render(), Err(BindError::NotMounted)));
    assert!(matches!(
        app.mount_markup("<div><p></div>"),
        Err(BindError::Markup(_))
    ));
    app.mount_markup("<p></p>").unwrap();
    assert!(matches!(
        app.get_data().set("missing.x", json!(1)),
        Err(BindError::State(StateError::NotFound(_)))
    ));
    assert!(matches!(
        app.get_data().push("s", vec![]),
        Err(BindError::State(StateError::NotAnArray(_)))
    ));
    assert!(matches!(
        app.get_data().set("a..b", json!(1)),
        Err(BindError::State(StateError::InvalidPath(_)))
    ));
    assert!(matches!(
        app.get_data().set("items.length", json!(1_000_000_000_000_000_000u64)),
        Err(BindError::State(StateError::LengthTooLarge { .. }))
    ));
    assert_eq!(app.get_path_data("items"), Some(json!([])));
    assert_eq!(app.get_path_data("nope.deeper"), None);
}

#[test]
fn test_interpolation_toggle_applies_to_later_scans() {
    let mut app = App::new(json!({"items": ["a"]}));
    app.enable_interpolation(false);
    app.mount_markup(LIST).unwrap();
    assert_eq!(item_texts(&app, "list"), vec!["{{items[0]}}"]);
}
