//! Middleware pipeline tests.

use super::*;
use crate::request::Request;

fn record_layer(tag: &'static str, seen: Arc<Mutex<Vec<&'static str>>>) -> impl Fn(Request, crate::node::Next) -> crate::node::LayerFuture + Send + Sync + 'static {
    move |req, next| {
        let seen = seen.clone();
        Box::pin(async move {
            seen.lock().unwrap().push(tag);
            next.invoke(req).await
        })
    }
}

#[tokio::test]
async fn test_downstream_visits_layers_in_install_order() {
    let node = make_node();
    node.register("dev", TestDevice::with_property("prop", json!(1)))
        .await
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    node.use_middleware(record_layer("first", seen.clone()));
    node.use_middleware(record_layer("second", seen.clone()));

    node.dispatch(Request::get(".:dev", "prop")).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
}

#[tokio::test]
async fn test_upstream_visits_layers_in_reverse_order() {
    let node = make_node();

    let seen = Arc::new(Mutex::new(Vec::new()));
    node.use_middleware(record_layer("first", seen.clone()));
    node.use_middleware(record_layer("second", seen.clone()));

    let res = node
        .dispatch(Request::put(".:dev", "metric", json!(3)))
        .await
        .unwrap();
    assert_eq!(res, json!(true));
    assert_eq!(*seen.lock().unwrap(), vec!["second", "first"]);
}

#[tokio::test]
async fn test_layer_short_circuits_with_value() {
    let node = make_node();
    // No device registered: reaching the final handler would fail.
    node.use_middleware(|_req, _next| Box::pin(async { Ok(Some(json!("cached"))) }));

    let res = node.dispatch(Request::get(".:ghost", "prop")).await.unwrap();
    assert_eq!(res, json!("cached"));
}

#[tokio::test]
async fn test_empty_layer_result_substitutes_deeper_value() {
    let node = make_node();
    node.register("dev", TestDevice::with_property("prop", json!({"a": 1})))
        .await
        .unwrap();

    // Invokes next, discards the value, resolves to nothing: the
    // dispatcher substitutes the deeper result.
    node.use_middleware(|req, next| {
        Box::pin(async move {
            next.invoke(req).await?;
            Ok(None)
        })
    });

    let res = node.dispatch(Request::get(".:dev", "prop")).await.unwrap();
    assert_eq!(res, json!({"a": 1}));
}

#[tokio::test]
async fn test_errors_flow_backward_to_earlier_layers() {
    let node = make_node();
    let observed = Arc::new(Mutex::new(None));

    let observed_l = observed.clone();
    node.use_middleware(move |req, next| {
        let observed = observed_l.clone();
        Box::pin(async move {
            match next.invoke(req).await {
                Err(e) => {
                    *observed.lock().unwrap() = Some(e.to_string());
                    Ok(Some(json!("recovered")))
                }
                other => other,
            }
        })
    });
    node.use_middleware(|_req, _next| {
        Box::pin(async { Err(Error::Remote("layer exploded".to_string())) })
    });

    let res = node.dispatch(Request::get(".:dev", "prop")).await.unwrap();
    assert_eq!(res, json!("recovered"));
    assert_eq!(
        observed.lock().unwrap().as_deref(),
        Some("layer exploded")
    );
}

#[tokio::test]
async fn test_unhandled_layer_error_becomes_dispatch_result() {
    let node = make_node();
    node.use_middleware(|_req, _next| {
        Box::pin(async { Err(Error::Remote("layer exploded".to_string())) })
    });

    let err = node.dispatch(Request::get(".:dev", "prop")).await.unwrap_err();
    assert_eq!(err.to_string(), "layer exploded");
}

#[tokio::test]
async fn test_layer_without_next_or_value_fails() {
    let node = make_node();
    node.use_middleware(|_req, _next| Box::pin(async { Ok(None) }));

    let err = node.dispatch(Request::get(".:dev", "prop")).await.unwrap_err();
    assert!(matches!(err, Error::LayerMustRespond));
}

#[tokio::test]
async fn test_unregistered_device_message() {
    let node = make_node();
    let err = node.dispatch(Request::get(".:ghost", "prop")).await.unwrap_err();
    assert_eq!(err.to_string(), "Device '.:ghost' is not connected");
}

#[tokio::test]
async fn test_set_and_invoke_substitute_true_for_empty_results() {
    let node = make_node();
    node.register("dev", TestDevice::new()).await.unwrap();

    let res = node
        .dispatch(Request::set(".:dev", "prop", json!(9)))
        .await
        .unwrap();
    assert_eq!(res, json!(true));

    let res = node
        .dispatch(Request::invoke(".:dev", "noop", json!({})))
        .await
        .unwrap();
    assert_eq!(res, json!(true));

    // Non-empty results pass through untouched.
    let res = node
        .dispatch(Request::invoke(".:dev", "echo", json!({"p": 1})))
        .await
        .unwrap();
    assert_eq!(res, json!({"invoked": "echo", "params": {"p": 1}}));
}

#[tokio::test]
async fn test_config_and_describe_reach_device() {
    let node = make_node();
    let device = TestDevice::new();
    node.register("dev", device.clone()).await.unwrap();

    let res = node
        .dispatch(Request::config(".:dev", "rate", json!(50)))
        .await
        .unwrap();
    assert_eq!(res, json!("configured"));
    assert_eq!(device.property("cfg:rate"), Some(json!(50)));

    let res = node
        .dispatch(Request::describe(".:dev", "rate"))
        .await
        .unwrap();
    assert_eq!(res, json!({"name": "rate", "type": "object"}));
}
