//! Linking materialized instances through relations.

use clabject_kernel::{
    AcceptAll, AssociationRule, ClabjectError, DeepInstance, Fragment, InstanceFactory,
    Multiplicity, Registry, TypeHandle,
};
use clabject_store::MemoryRegistry;
use std::sync::Arc;

/// `Car -hasEngine[1]-> Engine`, `V8Engine extends Engine`, `Wheel`.
async fn garage() -> (Arc<MemoryRegistry>, InstanceFactory) {
    let registry = MemoryRegistry::new(Arc::new(AcceptAll));
    let engine = Fragment::node("Engine", Arc::new(AcceptAll));
    let mut v8 = Fragment::node("V8Engine", Arc::new(AcceptAll));
    v8.extend(engine.clone()).expect("extend");
    let mut car = Fragment::node("Car", Arc::new(AcceptAll));
    car.apply_rule(AssociationRule::new("hasEngine", "Engine", Multiplicity::Exact(1)))
        .expect("rule");

    for fragment in [engine, v8, car, Fragment::node("Wheel", Arc::new(AcceptAll))] {
        registry
            .set_type(&TypeHandle::new(fragment))
            .await
            .expect("set type");
    }
    let factory = InstanceFactory::new(registry.clone());
    (registry, factory)
}

async fn instantiate(factory: &InstanceFactory, type_name: &str) -> DeepInstance {
    factory
        .new_instance(type_name, None)
        .await
        .expect("instantiate")
}

#[tokio::test]
async fn subtype_instances_are_accepted_for_their_supertype() {
    let (_, factory) = garage().await;
    let mut car = instantiate(&factory, "Car").await;
    let v8 = instantiate(&factory, "V8Engine").await;
    assert_eq!(
        v8.type_closure().into_iter().collect::<Vec<_>>(),
        ["Engine", "V8Engine"]
    );

    let as_v8 = car
        .associate(&v8, "V8Engine", "hasEngine")
        .expect("V8Engine is an Engine");
    let as_engine = car
        .associate(&v8, "Engine", "hasEngine")
        .expect("viewed as its Engine level");

    let target = |id: &str| {
        car.shape()
            .associations
            .iter()
            .find(|row| row.id == id)
            .map(|row| row.target_instance_id.clone())
    };
    assert_eq!(target(as_v8.as_str()).as_deref(), Some(v8.instance_id()));
    assert_eq!(
        target(as_engine.as_str()).as_deref(),
        v8.parent("Engine").map(DeepInstance::instance_id)
    );
}

#[tokio::test]
async fn foreign_types_and_relations_are_rejected() {
    let (_, factory) = garage().await;
    let mut car = instantiate(&factory, "Car").await;
    let v8 = instantiate(&factory, "V8Engine").await;
    let wheel = instantiate(&factory, "Wheel").await;

    assert!(matches!(
        car.associate(&v8, "Wheel", "hasEngine"),
        Err(ClabjectError::TypeNotInClosure { .. })
    ));
    assert!(matches!(
        car.associate(&v8, "V8Engine", "hasWheel"),
        Err(ClabjectError::AssociationNotAllowed { .. })
    ));
    assert!(matches!(
        car.associate(&wheel, "Wheel", "hasEngine"),
        Err(ClabjectError::AssociationNotAllowed { .. })
    ));
    assert!(car.shape().associations.is_empty());
}

#[tokio::test]
async fn folded_instances_only_know_their_own_type() {
    let (registry, factory) = garage().await;
    let mut car = instantiate(&factory, "Car").await;
    let v8 = instantiate(&factory, "V8Engine").await;

    let mut loaded = registry
        .get(v8.instance_id())
        .await
        .expect("lookup")
        .expect("persisted");
    assert!(matches!(
        car.associate(&loaded, "Engine", "hasEngine"),
        Err(ClabjectError::TypeNotInClosure { .. })
    ));

    loaded.unfold().await.expect("unfold");
    car.associate(&loaded, "Engine", "hasEngine")
        .expect("unfolded closure includes Engine");
}

#[tokio::test]
async fn associations_persist_on_commit() {
    let (registry, factory) = garage().await;
    let mut car = instantiate(&factory, "Car").await;
    let v8 = instantiate(&factory, "V8Engine").await;

    let id = car
        .associate(&v8, "V8Engine", "hasEngine")
        .expect("associate");
    let before = registry
        .get(car.instance_id())
        .await
        .expect("lookup")
        .expect("persisted");
    assert!(before.shape().associations.is_empty());

    car.commit().await.expect("commit");
    let after = registry
        .get(car.instance_id())
        .await
        .expect("lookup")
        .expect("persisted");
    let row = &after.shape().associations[0];
    assert_eq!(row.id, id);
    assert!(!row.is_final);

    assert!(car.remove_association(&id));
    assert!(!car.remove_association(&id));
    car.commit().await.expect("commit");
    let cleared = registry
        .get(car.instance_id())
        .await
        .expect("lookup")
        .expect("persisted");
    assert!(cleared.shape().associations.is_empty());
}
