mod common;

use common::Fixture;

#[test]
fn parse_errors_are_thrown() {
    let fx = Fixture::load();
    let message = fx.thrown("new Template('test_template').parse('{{ .foo')");
    assert!(message.starts_with("template: test_template:1:"), "{message}");
}

#[test]
fn unrecognized_option_is_a_recovered_panic() {
    let fx = Fixture::load();
    fx.eval("var t = new Template('test_template');");
    assert_eq!(
        fx.thrown("t.option('invalidArg')"),
        "caught panic: unrecognized option: invalidArg"
    );

    // The module keeps working afterwards.
    assert_eq!(fx.eval("t.parse('ok').executeString()"), "ok");
}

#[test]
fn methods_reject_foreign_receivers() {
    let fx = Fixture::load();
    let (name, message, code) =
        fx.error("new Template('test_template').parse.call({}, 'x')");
    assert_eq!(name, "TypeError");
    assert!(message.contains("missing or invalid type tag"), "{message}");
    assert_eq!(code.as_deref(), Some("ERR_INVALID_ARG_TYPE"));
}

#[test]
fn string_arguments_are_checked() {
    let fx = Fixture::load();
    fx.eval("var t = new Template('test_template');");
    for source in ["t.parse(123)", "t.parse()", "t.lookup(null)"] {
        let (name, message, code) = fx.error(source);
        assert_eq!(name, "TypeError", "{source}");
        assert_eq!(message, "A string was expected", "{source}");
        assert_eq!(code.as_deref(), Some("string_expected"), "{source}");
    }
}

#[test]
fn unsupported_data_is_rejected() {
    let fx = Fixture::load();
    let (name, message, code) =
        fx.error("new Template('test_template').parse('{{ . }}').executeString(Symbol('s'))");
    assert_eq!(name, "TypeError");
    assert_eq!(message, "Unsupported value type: symbol");
    assert_eq!(code.as_deref(), Some("ERR_INVALID_ARG_TYPE"));
}

#[test]
fn results_that_cannot_cross_are_errors() {
    let fx = Fixture::load();
    let message = fx.thrown(
        "new Template('test_template')
           .funcs({ f: () => Symbol('s') })
           .parse('{{ f }}')
           .executeString()",
    );
    assert!(message.contains("Unsupported value type: symbol"), "{message}");
}

#[test]
fn funcs_requires_an_object() {
    let fx = Fixture::load();
    fx.eval("var t = new Template('test_template');");
    for source in ["t.funcs(undefined)", "t.funcs(null)", "t.funcs()"] {
        let (name, message, _) = fx.error(source);
        assert_eq!(name, "TypeError");
        assert_eq!(message, "Cannot convert undefined or null to object", "{source}");
    }
    assert_eq!(fx.thrown("t.funcs(1)"), "funcs expects an object, got number");
}

#[test]
fn funcs_rejects_non_functions_and_registers_nothing() {
    let fx = Fixture::load();
    fx.eval("var t = new Template('test_template');");
    let baseline = fx.host.live_references();

    assert_eq!(
        fx.thrown("t.funcs({ good: counter('good', 'good'), invalid: 1 })"),
        "Key 'invalid' is not a function"
    );
    assert_eq!(fx.host.live_references(), baseline);
    assert!(fx.host.eval("t.parse('{{ good }}')").is_err());
}

#[test]
fn nul_bytes_in_keys_still_raise() {
    let fx = Fixture::load();
    fx.eval("var t = new Template('test_template');");
    let baseline = fx.host.live_references();

    let (name, message, _) = fx.error(r#"t.funcs({ "bad\0key": 1 })"#);
    assert_eq!(name, "TypeError");
    assert_eq!(message, r"Key 'bad\0key' is not a function");
    assert_eq!(fx.host.live_references(), baseline);
}

#[test]
fn invalid_function_names_roll_back() {
    let fx = Fixture::load();
    fx.eval("var t = new Template('test_template');");
    let baseline = fx.host.live_references();

    assert_eq!(
        fx.thrown("t.funcs({ '': counter('f', 'f') })"),
        r#"caught panic: function name "" is not a valid identifier"#
    );
    assert_eq!(fx.host.live_references(), baseline);
}

#[test]
fn host_exceptions_propagate_unchanged() {
    let fx = Fixture::load();
    assert_eq!(
        fx.eval(
            "var marker = new RangeError('thrown by host');
             var t = new Template('test_template').funcs({ thrower: () => { throw marker; } });
             t.parse('{{ thrower }}');
             var same = false;
             try { t.executeString(); } catch (e) { same = e === marker; }
             same"
        ),
        "true"
    );
    assert_eq!(fx.eval("'no exception left pending'"), "no exception left pending");
}

#[test]
fn missing_files() {
    let fx = Fixture::load();
    fx.eval("var t = new Template('test_template');");

    let message = fx.thrown("t.parseFiles('/invalid/path/to/template.tpl')");
    assert!(message.contains("no such file or directory"), "{message}");

    assert_eq!(
        fx.thrown("t.parseFiles()"),
        "template: no files named in call to ParseFiles"
    );

    let message = fx.thrown("t.parseGlob('/invalid/path/to/template/dir/*')");
    assert!(message.contains("pattern matches no files"), "{message}");

    let message = fx.thrown("Template.parseGlob('/invalid/path/to/template/dir/*')");
    assert!(message.contains("pattern matches no files"), "{message}");
}

#[test]
fn unknown_template_name() {
    let fx = Fixture::load();
    let message = fx.thrown("new Template('test_template').parse('x').executeTemplateString('invalid')");
    assert!(message.contains(r#"no template "invalid""#), "{message}");
}

#[test]
fn empty_template_is_incomplete() {
    let fx = Fixture::load();
    let (name, message, code) = fx.error("new Template('test_template').executeString()");
    assert_eq!(name, "Error");
    assert_eq!(
        message,
        r#"template: test_template: "test_template" is an incomplete or empty template"#
    );
    assert_eq!(code, None);
}

#[test]
fn throwing_getters_propagate() {
    let fx = Fixture::load();
    fx.eval(
        "var t = new Template('test_template');
         var map = {};
         Object.defineProperty(map, 'boom', {
           enumerable: true,
           get() { throw new Error('getter failed'); },
         });",
    );
    let baseline = fx.host.live_references();

    assert_eq!(fx.thrown("t.funcs(map)"), "getter failed");
    assert_eq!(fx.host.live_references(), baseline);

    assert_eq!(fx.thrown("t.parse('{{ .boom }}').executeString(map)"), "getter failed");
}
