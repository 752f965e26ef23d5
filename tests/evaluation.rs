//! Registration, caching and reducer wiring through the public API.

use compfit::components::{Constant, FuncWrap, Item, Polynomial, Template};
use compfit::domain::Domain;
use compfit::error::FitError;
use compfit::eval::{Model, Reducer};
use compfit::params::{CompParamId, ParamSlots};

fn domain() -> Domain {
    Domain::linspace(0.0, 1.0, 4).unwrap()
}

#[test]
fn slurping_reducer_only_sees_components_present_at_registration() {
    let mut model = Model::new(domain());
    model.add("a", 1.0).unwrap();
    model.add("b", 2.0).unwrap();
    model.add_reducer("sum", Reducer::sum_all()).unwrap();
    model.add("c", 100.0).unwrap();

    model.evaluate().unwrap();
    assert_eq!(model.output(0).unwrap(), &[3.0; 4]);

    model.param_mut(&CompParamId::parse(0, "c", "value").unwrap()).unwrap().value = 7.0;
    model.evaluate().unwrap();
    assert_eq!(model.output(0).unwrap(), &[3.0; 4]);
}

#[test]
fn untouched_components_are_not_re_evaluated() {
    let mut model = Model::new(domain());
    model.add("a", 1.0).unwrap();
    model.add_component("poly", Polynomial::new([0.0, 1.0, 0.5])).unwrap();
    model.add_reducer("sum", Reducer::sum_all()).unwrap();

    for _ in 0..5 {
        model.quick_evaluate().unwrap();
    }
    assert_eq!(model.eval_count(0, "a").unwrap(), 1);
    assert_eq!(model.eval_count(0, "poly").unwrap(), 1);

    model
        .param_mut(&CompParamId::parse(0, "poly", "coeff[3]").unwrap())
        .unwrap()
        .value = 0.25;
    model.evaluate().unwrap();
    assert_eq!(model.eval_count(0, "a").unwrap(), 1);
    assert_eq!(model.eval_count(0, "poly").unwrap(), 2);
}

#[test]
fn expression_reducer_and_selection() {
    let mut model = Model::new(domain());
    model.add("k", 2.0).unwrap();
    model
        .add("shape", Item::component(Template::new(vec![1.0, 2.0, 3.0, 4.0])))
        .unwrap();
    model.add_reducer("scaled", Reducer::product(["k", "shape"])).unwrap();
    model
        .add_reducer(
            "integral",
            Reducer::expr(["scaled"], |named| {
                vec![named.get("scaled").map_or(0.0, |b| b.iter().sum())]
            }),
        )
        .unwrap();

    model.evaluate().unwrap();
    assert_eq!(model.output(0).unwrap(), &[2.0, 4.0, 6.0, 8.0]);
    model.select(0, "integral").unwrap();
    assert_eq!(model.output(0).unwrap(), &[20.0]);
    assert!(matches!(model.select(0, "k"), Err(FitError::Configuration(_))));
}

#[test]
fn custom_component_through_func_wrap() {
    let slots = ParamSlots::new().scalar("a", 2.0).scalar("b", 1.0);
    let comp = FuncWrap::new(slots, |buf: &mut [f64], dom: &Domain, p: &[f64]| {
        if let Some(x) = dom.axis(0) {
            for (out, xi) in buf.iter_mut().zip(x) {
                *out = p[0] * xi + p[1];
            }
        }
    });
    let mut model = Model::new(domain());
    model.add_component("f", comp).unwrap();
    model.evaluate().unwrap();
    let out = model.output(0).unwrap();
    assert!((out[3] - 3.0).abs() < 1e-12);
    assert_eq!(model.flat_ids().len(), 2);
}

#[test]
fn duplicate_names_and_unknown_units_are_configuration_errors() {
    let mut model = Model::new(domain());
    model.add_component("a", Constant::new(1.0)).unwrap();
    assert!(matches!(model.add("a", 2.0), Err(FitError::Configuration(_))));
    assert!(matches!(model.add_to(3, "b", 2.0), Err(FitError::Configuration(_))));
    assert!(model.output(1).is_err());
}
