//! Class semantics: construction, method binding, inheritance, and the
//! copy-on-write instance template.

use pinion::{CollectStringPrint, Config, Context};

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

#[test]
fn init_and_methods() {
    let src = "\
class Point:
    def __init__(self, x, y):
        self.x = x
        self.y = y
    def total(self):
        return self.x + self.y
p = Point(3, 4)
print(p.x, p.y, p.total())
";
    assert_eq!(run(src), "3 4 7\n");
}

#[test]
fn single_inheritance_method_resolution() {
    let src = "\
class A:
    def who(self): return 'A'
    def greet(self): return 'hi ' + self.who()
class B(A):
    def who(self): return 'B'
a = A()
b = B()
print(a.who(), b.who(), b.greet())
";
    assert_eq!(run(src), "A B hi B\n");
}

#[test]
fn class_attribute_updates_reach_unshadowed_instances() {
    let src = "\
class C:
    pass
a = C()
C.shared = 1
b = C()
print(a.shared, b.shared)
a.shared = 10
print(a.shared, b.shared)
";
    assert_eq!(run(src), "1 1\n10 1\n");
}

#[test]
fn instance_attributes_are_private_to_the_instance() {
    let src = "\
class C:
    def __init__(self):
        self.items = []
a = C()
b = C()
a.items.append(1)
print(a.items, b.items)
";
    assert_eq!(run(src), "[1] []\n");
}

#[test]
fn dunder_operators_dispatch_on_the_left_operand() {
    let src = "\
class Vec:
    def __init__(self, x):
        self.x = x
    def __add__(self, other):
        return Vec(self.x + other.x)
    def __eq__(self, other):
        return self.x == other.x
    def __repr__(self):
        return 'Vec({})'.format(self.x)
v = Vec(1) + Vec(2)
print(v, v == Vec(3), v == Vec(9))
";
    assert_eq!(run(src), "Vec(3) True False\n");
}

#[test]
fn comparison_methods_must_return_bool() {
    let src = "\
class Odd:
    def __lt__(self, other): return 'nope'
try:
    Odd() < Odd()
except TypeError:
    print('checked')
";
    assert_eq!(run(src), "checked\n");
}

#[test]
fn callable_instances() {
    let src = "\
class Adder:
    def __init__(self, n): self.n = n
    def __call__(self, x): return self.n + x
add3 = Adder(3)
print(add3(4))
";
    assert_eq!(run(src), "7\n");
}

#[test]
fn getitem_setitem_len() {
    let src = "\
class Box:
    def __init__(self): self.data = {}
    def __getitem__(self, k): return self.data[k]
    def __setitem__(self, k, v): self.data[k] = v
    def __len__(self): return len(self.data)
b = Box()
b['a'] = 1
print(b['a'], len(b))
";
    assert_eq!(run(src), "1 1\n");
}

#[test]
fn iteration_protocol_with_user_class() {
    assert_eq!(
        run("class R:\n    def __iter__(self): self.i = 0; return self\n    def __next__(self):\n        if self.i == 3: raise StopIteration\n        self.i += 1; return self.i\nprint([x for x in R()])"),
        "[1, 2, 3]\n"
    );
}

#[test]
fn str_and_repr_dispatch() {
    let src = "\
class Named:
    def __init__(self, name): self.name = name
    def __str__(self): return 'named ' + self.name
print(Named('x'))
";
    assert_eq!(run(src), "named x\n");
}

#[test]
fn type_and_class_attributes() {
    let src = "\
class C:
    pass
c = C()
print(type(c) is C, type(3) is int)
print(C.__name__)
";
    assert_eq!(run(src), "True True\nC\n");
}

#[test]
fn isinstance_walks_bases() {
    let src = "\
class A:
    pass
class B(A):
    pass
b = B()
print(isinstance(b, B), isinstance(b, A), isinstance(b, int))
print(isinstance(True, int), isinstance(3, (str, int)))
";
    assert_eq!(run(src), "True True False\nTrue True\n");
}

#[test]
fn attribute_from_base_binds_the_receiver() {
    let src = "\
class A:
    def f(self): return 'A'
class B(A):
    def f(self): return 'B'
b = B()
";
    let mut ctx = Context::new(Config::default()).expect("context creation");
    let program = ctx.compile(src, "__main__").expect("compile");
    ctx.invoke(program, &[], &[]).expect("run");

    let b = ctx.get_global("__main__", "b").expect("b");
    let a_class = ctx.get_global("__main__", "A").expect("A");
    let b_class = ctx.get_global("__main__", "B").expect("B");

    let from_b = ctx.get_attribute(b, "f").expect("bound f");
    let direct = ctx.invoke(from_b, &[], &[]).expect("call");
    assert_eq!(ctx.as_str(direct).as_deref(), Some("B"));

    let from_base = ctx
        .get_attribute_from_base(b, "f", a_class)
        .expect("f from base A");
    let result = ctx.invoke(from_base, &[], &[]).expect("call");
    assert_eq!(ctx.as_str(result).as_deref(), Some("A"));

    let from_own = ctx
        .get_attribute_from_base(b, "f", b_class)
        .expect("f from base B");
    let result = ctx.invoke(from_own, &[], &[]).expect("call");
    assert_eq!(ctx.as_str(result).as_deref(), Some("B"));
}

#[test]
fn methods_capture_enclosing_scope() {
    let src = "\
def make(tag):
    class Tagged:
        def get(self):
            return tag
    return Tagged()
print(make('t1').get(), make('t2').get())
";
    assert_eq!(run(src), "t1 t2\n");
}

#[test]
fn default_instances_hash_by_identity() {
    let src = "\
class K:
    pass
a = K()
b = K()
d = {a: 1, b: 2}
print(len(d), d[a], d[b])
";
    assert_eq!(run(src), "2 1 2\n");
}

#[test]
fn user_hash_and_eq_drive_dict_lookup() {
    let src = "\
class Key:
    def __init__(self, n): self.n = n
    def __hash__(self): return self.n
    def __eq__(self, other): return self.n == other.n
d = {}
d[Key(1)] = 'one'
print(d[Key(1)])
";
    assert_eq!(run(src), "one\n");
}
