//! The host-facing value and invocation surface.

use pinion::{CollectStringPrint, Config, Context, Object};

fn context() -> Context {
    Context::new(Config::default()).expect("context creation")
}

#[test]
fn compile_expression_mode() {
    let mut ctx = context();
    let expr = ctx.compile_expression("2 ** 10 + 1", "calc").expect("compile");
    let result = ctx.invoke(expr, &[], &[]).expect("run");
    assert_eq!(ctx.as_int(result), Some(1025));
}

#[test]
fn invoke_with_positional_and_keyword_arguments() {
    let mut ctx = context();
    let program = ctx
        .compile("def f(a, b=2, **rest):\n    return a + b + rest.get('c', 0)", "__main__")
        .expect("compile");
    ctx.invoke(program, &[], &[]).expect("run");
    let f = ctx.get_global("__main__", "f").expect("f");

    let one = ctx.int_value(1);
    let result = ctx.invoke(f, &[one], &[]).expect("call");
    assert_eq!(ctx.as_int(result), Some(3));

    let ten = ctx.int_value(10);
    let three = ctx.int_value(3);
    let result = ctx.invoke(f, &[one], &[("b", ten), ("c", three)]).expect("call");
    assert_eq!(ctx.as_int(result), Some(14));
}

#[test]
fn value_constructors_and_inspection() {
    let mut ctx = context();
    assert!(ctx.is_none(ctx.none()));
    assert_eq!(ctx.as_bool(ctx.bool_value(true)), Some(true));
    assert_eq!(ctx.as_int(ctx.int_value(7)), Some(7));
    assert_eq!(ctx.as_float(ctx.float_value(2.5)), Some(2.5));
    let s = ctx.str_value("hi").expect("str");
    assert_eq!(ctx.as_str(s).as_deref(), Some("hi"));
    assert!(ctx.truthy(s).expect("truthy"));
}

#[test]
fn attribute_and_item_surface() {
    let mut ctx = context();
    let program = ctx
        .compile("class Bag:\n    pass\nbag = Bag()\nbag.x = 1\nd = {'k': 'v'}", "__main__")
        .expect("compile");
    ctx.invoke(program, &[], &[]).expect("run");

    let bag = ctx.get_global("__main__", "bag").expect("bag");
    let x = ctx.get_attribute(bag, "x").expect("x");
    assert_eq!(ctx.as_int(x), Some(1));

    let two = ctx.int_value(2);
    ctx.set_attribute(bag, "y", two).expect("set");
    let y = ctx.get_attribute(bag, "y").expect("y");
    assert_eq!(ctx.as_int(y), Some(2));

    ctx.delete_attribute(bag, "y").expect("delete");
    assert!(ctx.get_attribute(bag, "y").is_err());

    let d = ctx.get_global("__main__", "d").expect("d");
    let key = ctx.str_value("k").expect("key");
    let v = ctx.get_item(d, key).expect("item");
    assert_eq!(ctx.as_str(v).as_deref(), Some("v"));

    let nv = ctx.str_value("w").expect("value");
    ctx.set_item(d, key, nv).expect("set item");
    let v = ctx.get_item(d, key).expect("item");
    assert_eq!(ctx.as_str(v).as_deref(), Some("w"));

    ctx.delete_item(d, key).expect("delete item");
    assert!(ctx.get_item(d, key).is_err());
}

#[test]
fn delete_attribute_keeps_class_template_entries() {
    let mut ctx = context();
    let program = ctx
        .compile("class C:\n    def m(self): return 'method'\nc = C()", "__main__")
        .expect("compile");
    ctx.invoke(program, &[], &[]).expect("run");

    let c = ctx.get_global("__main__", "c").expect("c");
    // Shadow the method on the instance, then delete the shadow: the
    // template entry is visible again.
    let shadow = ctx.int_value(5);
    ctx.set_attribute(c, "m", shadow).expect("shadow");
    let got = ctx.get_attribute(c, "m").expect("shadowed");
    assert_eq!(ctx.as_int(got), Some(5));

    ctx.delete_attribute(c, "m").expect("delete shadow");
    let method = ctx.get_attribute(c, "m").expect("method back");
    let result = ctx.invoke(method, &[], &[]).expect("call");
    assert_eq!(ctx.as_str(result).as_deref(), Some("method"));

    // Deleting again fails: the template is never touched.
    assert!(ctx.delete_attribute(c, "m").is_err());
}

#[test]
fn iterate_drives_the_protocol() {
    let mut ctx = context();
    let program = ctx
        .compile("values = [10, 20, 30]", "__main__")
        .expect("compile");
    ctx.invoke(program, &[], &[]).expect("run");
    let values = ctx.get_global("__main__", "values").expect("values");

    let mut seen = Vec::new();
    ctx.iterate(values, |ctx, v| {
        seen.push(ctx.as_int(v).expect("int"));
        Ok(true)
    })
    .expect("iterate");
    assert_eq!(seen, vec![10, 20, 30]);

    // Early stop.
    let mut count = 0;
    ctx.iterate(values, |_ctx, _v| {
        count += 1;
        Ok(count < 2)
    })
    .expect("iterate");
    assert_eq!(count, 2);
}

#[test]
fn object_round_trip() {
    let mut ctx = context();
    let input = Object::Dict(vec![
        (Object::Str("nums".to_string()), Object::List(vec![Object::Int(1), Object::Int(2)])),
        (Object::Str("name".to_string()), Object::Str("pin".to_string())),
    ]);
    let value = ctx.from_object(&input).expect("from object");
    let back = ctx.to_object(value).expect("to object");
    assert_eq!(back, input);
}

#[test]
fn native_functions_are_callable_from_script() {
    let print = CollectStringPrint::new();
    let output = print.handle();
    let mut ctx = Context::new(Config {
        print: Box::new(print),
        ..Config::default()
    })
    .expect("context creation");

    let triple = ctx
        .new_function("triple", |ctx, args| {
            let n = ctx.as_int(args[0]).unwrap_or(0);
            Ok(ctx.int_value(n * 3))
        })
        .expect("function");
    ctx.set_global("triple", triple).expect("bind");

    let program = ctx.compile("print(triple(14))", "__main__").expect("compile");
    ctx.invoke(program, &[], &[]).expect("run");
    assert_eq!(output.borrow().as_str(), "42\n");
}

#[test]
fn host_classes_construct_instances() {
    let mut ctx = context();
    let base = ctx.new_class("Widget", &[]).expect("class");
    ctx.set_global("Widget", base).expect("bind");
    let program = ctx
        .compile("w = Widget()\nw.size = 3\nanswer = w.size * 2", "__main__")
        .expect("compile");
    ctx.invoke(program, &[], &[]).expect("run");
    let v = ctx.get_global("__main__", "answer").expect("answer");
    assert_eq!(ctx.as_int(v), Some(6));
}

#[test]
fn to_string_and_repr() {
    let mut ctx = context();
    let s = ctx.str_value("hi").expect("str");
    assert_eq!(ctx.to_string_value(s).expect("str"), "hi");
    assert_eq!(ctx.to_repr(s).expect("repr"), "'hi'");
    let one = ctx.int_value(1);
    let l = ctx.new_list(&[one, s]).expect("list");
    assert_eq!(ctx.to_repr(l).expect("repr"), "[1, 'hi']");
}

#[test]
fn error_callback_receives_host_misuse() {
    use std::sync::{Arc, Mutex};
    let messages: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    pinion::set_error_callback(move |msg| sink.lock().unwrap().push(msg.to_string()));

    let mut ctx = context();
    let s = ctx.str_value("x").expect("str");
    ctx.unprotect(s);
    assert!(!messages.lock().unwrap().is_empty());
    pinion::clear_error_callback();
}
