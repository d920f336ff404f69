use std::time::Duration;

use arcs_syringe::{ Chain, MightyMini, PumpError, SyringePump };
use tokio_test::io::{ Builder, Mock };

fn chain(mock: Mock) -> Chain<Mock>
{
    Chain::with_timeout(mock, Duration::from_millis(50))
}

#[tokio::test]
async fn set_flowrate_clamps_and_confirms()
{
    let mock = Builder::new()
        .write(b"FM9999").read(b"OK\r")
        .write(b"CC").read(b"FM 0 9.999\r")
        .build();
    let mut chain = chain(mock);
    let mut pump = MightyMini::with("Mighty Mini");

    pump.set_flowrate(&mut chain, 12000.0).await.unwrap();
    assert_eq!(pump.flowrate(), Some("9999"));
}

#[tokio::test]
async fn set_flowrate_confirms_via_cc_query()
{
    let mock = Builder::new()
        .write(b"FM2500").read(b"OK\r")
        .write(b"CC").read(b"FM 0 2.500\r")
        .build();
    let mut chain = chain(mock);
    let mut pump = MightyMini::with("Mighty Mini");

    pump.set_flowrate(&mut chain, 2500.0).await.unwrap();
    assert_eq!(pump.flowrate(), Some("2500"));
}

#[tokio::test]
async fn set_flowrate_mismatch_leaves_field_unset()
{
    let mock = Builder::new()
        .write(b"FM2500").read(b"OK\r")
        .write(b"CC").read(b"FM 0 1.000\r")
        .build();
    let mut chain = chain(mock);
    let mut pump = MightyMini::with("Mighty Mini");

    let err = pump.set_flowrate(&mut chain, 2500.0).await.unwrap_err();
    assert!(matches!(err, PumpError::ReadbackMismatch { .. }));
    assert_eq!(pump.flowrate(), None);
}

#[tokio::test]
async fn set_flowrate_rejected_without_ok()
{
    let mock = Builder::new()
        .write(b"FM2500").read(b"NG\r")
        .build();
    let mut chain = chain(mock);
    let mut pump = MightyMini::with("Mighty Mini");

    let err = pump.set_flowrate(&mut chain, 2500.0).await.unwrap_err();
    assert!(matches!(err, PumpError::UnexpectedStatus { .. }));
}

#[tokio::test]
async fn infuse_checks_acknowledgement()
{
    let mock = Builder::new().write(b"RU").read(b"OK\r").build();
    let mut chain = chain(mock);
    let mut pump = MightyMini::with("Mighty Mini");

    pump.infuse(&mut chain).await.unwrap();
}

#[tokio::test]
async fn infuse_without_reply_is_fatal()
{
    let mock = Builder::new().write(b"RU").build();
    let mut chain = chain(mock);
    let mut pump = MightyMini::with("Mighty Mini");

    let err = pump.infuse(&mut chain).await.unwrap_err();
    assert!(matches!(err, PumpError::NoResponse { .. }));
}

#[tokio::test]
async fn stop_checks_acknowledgement()
{
    let mock = Builder::new().write(b"ST").read(b"OK\r").build();
    let mut chain = chain(mock);
    let mut pump = MightyMini::with("Mighty Mini");

    pump.stop(&mut chain).await.unwrap();
}

#[tokio::test]
async fn unsupported_operations_send_nothing()
{
    let mock = Builder::new().build();
    let mut chain = chain(mock);
    let mut pump = MightyMini::with("Mighty Mini");

    let err = pump.set_diameter(&mut chain, 16.0).await.unwrap_err();
    assert!(matches!(err, PumpError::Unsupported { .. }));

    let err = pump.set_target_volume(&mut chain, 100.0).await.unwrap_err();
    assert!(matches!(err, PumpError::Unsupported { .. }));

    let err = pump.withdraw(&mut chain).await.unwrap_err();
    assert!(matches!(err, PumpError::Unsupported { .. }));

    let err = pump.wait_until_target(&mut chain).await.unwrap_err();
    assert!(matches!(err, PumpError::Unsupported { .. }));
}
