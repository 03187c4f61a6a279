//! Exception propagation, handler matching, and finally semantics.

use pinion::{CollectStringPrint, Config, Context, ExcType};

fn run(src: &str) -> String {
    let print = CollectStringPrint::new();
    let output = print.handle();
    let mut ctx = Context::new(Config {
        print: Box::new(print),
        ..Config::default()
    })
    .expect("context creation");
    let program = ctx.compile(src, "__main__").expect("compile");
    ctx.invoke(program, &[], &[]).expect("run");
    let result = output.borrow().clone();
    result
}

fn run_err(src: &str) -> pinion::Exception {
    let mut ctx = Context::new(Config::default()).expect("context creation");
    let program = ctx.compile(src, "__main__").expect("compile");
    ctx.invoke(program, &[], &[]).expect_err("expected failure")
}

#[test]
fn finally_runs_before_return() {
    assert_eq!(
        run("def f():\n    try: return 1\n    finally: print('f')\nprint(f())"),
        "f\n1\n"
    );
}

#[test]
fn handler_priority() {
    assert_eq!(
        run("try: raise KeyError('k')\nexcept LookupError as e: print('caught', e)\nexcept: print('default')"),
        "caught k\n"
    );
}

#[test]
fn default_handler_catches_everything() {
    assert_eq!(
        run("try: raise ValueError('v')\nexcept KeyError: print('key')\nexcept: print('default')"),
        "default\n"
    );
}

#[test]
fn finally_runs_on_every_exit() {
    // Normal exit.
    assert_eq!(
        run("try: print('body')\nfinally: print('fin')"),
        "body\nfin\n"
    );
    // Exception exit.
    assert_eq!(
        run("try:\n    try: raise ValueError('x')\n    finally: print('fin')\nexcept ValueError: print('caught')"),
        "fin\ncaught\n"
    );
    // Break exit.
    assert_eq!(
        run("for i in range(3):\n    try:\n        if i == 1: break\n        print(i)\n    finally:\n        print('fin')"),
        "0\nfin\nfin\n"
    );
    // Continue exit.
    assert_eq!(
        run("for i in range(2):\n    try:\n        continue\n    finally:\n        print('fin', i)"),
        "fin 0\nfin 1\n"
    );
}

#[test]
fn finally_runs_exactly_once_per_entry() {
    assert_eq!(
        run("def f(n):\n    try:\n        if n: return 'r'\n        raise ValueError('v')\n    finally:\n        print('fin')\ntry: f(0)\nexcept ValueError: pass\nprint(f(1))"),
        "fin\nfin\nr\n"
    );
}

#[test]
fn nested_finally_order() {
    assert_eq!(
        run("def f():\n    try:\n        try:\n            return 1\n        finally:\n            print('inner')\n    finally:\n        print('outer')\nprint(f())"),
        "inner\nouter\n1\n"
    );
}

#[test]
fn except_runs_then_finally() {
    assert_eq!(
        run("try:\n    raise ValueError('x')\nexcept ValueError:\n    print('handler')\nfinally:\n    print('fin')"),
        "handler\nfin\n"
    );
}

#[test]
fn raise_inside_handler_reaches_outer_try() {
    assert_eq!(
        run("try:\n    try:\n        raise ValueError('a')\n    except ValueError:\n        raise KeyError('b')\nexcept KeyError as e:\n    print('outer', e)"),
        "outer b\n"
    );
}

#[test]
fn bare_raise_reraises() {
    assert_eq!(
        run("try:\n    try:\n        raise ValueError('v')\n    except ValueError:\n        print('first')\n        raise\nexcept ValueError as e:\n    print('second', e)"),
        "first\nsecond v\n"
    );
}

#[test]
fn raising_a_class_instantiates_it() {
    assert_eq!(
        run("try: raise ValueError\nexcept ValueError: print('ok')"),
        "ok\n"
    );
}

#[test]
fn raising_a_non_exception_is_a_type_error() {
    assert_eq!(
        run("try: raise 3\nexcept TypeError: print('bad raise')"),
        "bad raise\n"
    );
}

#[test]
fn user_exception_classes() {
    let src = "\
class AppError(Exception):
    pass
class NotFound(AppError):
    pass
try:
    raise NotFound('missing thing')
except AppError as e:
    print('app', e)
";
    assert_eq!(run(src), "app missing thing\n");
}

#[test]
fn stop_iteration_is_consumed_by_loops() {
    let src = "\
class Three:
    def __iter__(self): self.i = 0; return self
    def __next__(self):
        if self.i == 3: raise StopIteration
        self.i += 1
        return self.i
for v in Three():
    print(v)
";
    assert_eq!(run(src), "1\n2\n3\n");
}

#[test]
fn uncaught_exception_surfaces_with_kind() {
    let exc = run_err("raise ValueError('boom')");
    assert_eq!(exc.kind(), Some(ExcType::ValueError));
    assert_eq!(exc.type_name(), "ValueError");
    assert_eq!(exc.message(), Some("boom"));
}

#[test]
fn traceback_names_frames_and_lines() {
    let exc = run_err("def inner():\n    raise ValueError('deep')\ndef outer():\n    return inner()\nouter()");
    let tb = exc.traceback();
    assert!(tb.starts_with("Traceback (most recent call last):"), "{tb}");
    assert!(tb.contains("Function outer()"), "{tb}");
    assert!(tb.contains("Function inner()"), "{tb}");
    assert!(tb.contains("raise ValueError('deep')"), "{tb}");
    assert!(tb.trim_end().ends_with("ValueError: deep"), "{tb}");
    // Innermost frame last.
    let outer_at = tb.find("outer()").expect("outer frame");
    let inner_at = tb.find("inner()").expect("inner frame");
    assert!(outer_at < inner_at, "{tb}");
}

#[test]
fn system_exit_is_distinguished() {
    let exc = run_err("exit()");
    assert!(exc.is_system_exit());
}

#[test]
fn current_exception_is_queryable() {
    let mut ctx = Context::new(Config::default()).expect("context creation");
    let program = ctx.compile("raise KeyError('gone')", "__main__").expect("compile");
    assert!(ctx.invoke(program, &[], &[]).is_err());
    assert!(ctx.current_exception().is_some());
    let tb = ctx.traceback_string().expect("traceback");
    assert!(tb.contains("KeyError"), "{tb}");
    ctx.clear_exception();
    assert!(ctx.current_exception().is_none());
}

#[test]
fn name_errors() {
    assert_eq!(
        run("try: missing\nexcept NameError as e: print('name', e)"),
        "name name 'missing' is not defined\n"
    );
    assert_eq!(
        run("def f():\n    return missing_global\ntry: f()\nexcept NameError: print('name')"),
        "name\n"
    );
}

#[test]
fn syntax_error_on_compile() {
    let mut ctx = Context::new(Config::default()).expect("context creation");
    let exc = ctx
        .compile("if x\n    pass", "__main__")
        .expect_err("expected syntax error");
    assert_eq!(exc.kind(), Some(ExcType::SyntaxError));
    let frame = &exc.frames()[0];
    assert!(frame.is_syntax);
    assert_eq!(frame.line, 1);
}

#[test]
fn finally_return_overrides_pending_exception() {
    assert_eq!(
        run("def f():\n    try:\n        raise ValueError('x')\n    finally:\n        return 'swallowed'\nprint(f())"),
        "swallowed\n"
    );
}
