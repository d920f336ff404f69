use std::time::Duration;

use arcs_syringe::{ Chain, Phd2000, PumpError, SyringePump };
use tokio_test::io::{ Builder, Mock };

const VER_CMD: &[u8] = b"03VER\r";
const VER_REPLY: &[u8] = b"\r\nPHD2000 2.2 03:";

async fn attach(mock: Mock) -> (Chain<Mock>, Phd2000)
{
    let mut chain = Chain::with_timeout(mock, Duration::from_millis(50));
    let pump = Phd2000::with(&mut chain, 3, "PHD2000").await.unwrap();
    (chain, pump)
}

#[tokio::test]
async fn attach_confirms_address_echo()
{
    let mock = Builder::new().write(VER_CMD).read(VER_REPLY).build();
    let (chain, pump) = attach(mock).await;

    assert!(chain.is_open());
    assert_eq!(pump.address(), 3);
}

#[tokio::test]
async fn target_volume_travels_in_millilitres()
{
    let mock = Builder::new()
        .write(VER_CMD).read(VER_REPLY)
        .write(b"03MLT0.1\r").read(b"\r\n03:")
        .build();
    let (mut chain, mut pump) = attach(mock).await;

    pump.set_target_volume(&mut chain, 100.0).await.unwrap();

    let stored = pump.target_volume().unwrap();
    assert!((stored - 100.0).abs() < 1e-9);
}

#[tokio::test]
async fn target_volume_truncates_to_field_width()
{
    let mock = Builder::new()
        .write(VER_CMD).read(VER_REPLY)
        .write(b"03MLT0.123\r").read(b"\r\n03>")
        .build();
    let (mut chain, mut pump) = attach(mock).await;

    pump.set_target_volume(&mut chain, 123.456).await.unwrap();

    let stored = pump.target_volume().unwrap();
    assert!((stored - 123.0).abs() < 1e-9);
}

#[tokio::test]
async fn target_volume_foreign_echo_is_fatal()
{
    let mock = Builder::new()
        .write(VER_CMD).read(VER_REPLY)
        .write(b"03MLT0.1\r").read(b"\r\n05:")
        .build();
    let (mut chain, mut pump) = attach(mock).await;

    let err = pump.set_target_volume(&mut chain, 100.0).await.unwrap_err();
    assert!(matches!(err, PumpError::AddressMismatch { .. }));
    assert_eq!(pump.target_volume(), None);
}

#[tokio::test]
async fn stop_expects_star()
{
    let mock = Builder::new()
        .write(VER_CMD).read(VER_REPLY)
        .write(b"03STP\r").read(b"\r\n03*")
        .build();
    let (mut chain, mut pump) = attach(mock).await;

    pump.stop(&mut chain).await.unwrap();
}

#[tokio::test]
async fn stop_rejects_idle_symbol()
{
    let mock = Builder::new()
        .write(VER_CMD).read(VER_REPLY)
        .write(b"03STP\r").read(b"\r\n03:")
        .build();
    let (mut chain, mut pump) = attach(mock).await;

    let err = pump.stop(&mut chain).await.unwrap_err();
    assert!(matches!(err, PumpError::UnexpectedStatus { .. }));
}

#[tokio::test]
async fn infuse_delegates_to_the_shared_dialect()
{
    let mock = Builder::new()
        .write(VER_CMD).read(VER_REPLY)
        .write(b"03RUN\r").read(b"\r\n03>")
        .build();
    let (mut chain, mut pump) = attach(mock).await;

    pump.infuse(&mut chain).await.unwrap();
}
