//! Assertion macros for envelopes and results

/// Assert that a result is ok and return the value
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
}

/// Assert that a recording transport received a frame of the given type
#[macro_export]
macro_rules! assert_received {
    ($transport:expr, $kind:expr) => {
        assert!(
            $transport.types().iter().any(|t| t == $kind),
            "Expected a '{}' frame, got {:?}",
            $kind,
            $transport.types()
        );
    };
}

/// Assert that a recording transport never received a frame of the given type
#[macro_export]
macro_rules! assert_not_received {
    ($transport:expr, $kind:expr) => {
        assert!(
            !$transport.types().iter().any(|t| t == $kind),
            "Did not expect a '{}' frame, got {:?}",
            $kind,
            $transport.types()
        );
    };
}
