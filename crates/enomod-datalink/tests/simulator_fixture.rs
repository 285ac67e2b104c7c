use enomod_core::encoding::Reader;
use enomod_core::pdu::Response;
use enomod_datalink::{DataLink, ModbusTcpServer, ModbusTcpTransport, SimulatedCharger};
use std::sync::Arc;

#[tokio::test]
async fn transport_reads_and_writes_simulated_charger() {
    let charger = Arc::new(SimulatedCharger::new(true, false));

    let server = ModbusTcpServer::bind("127.0.0.1:0", Arc::clone(&charger))
        .await
        .unwrap();
    let port = server.local_addr().unwrap().port();
    let server_task = tokio::spawn(server.run());

    let transport = ModbusTcpTransport::new("127.0.0.1", port);

    let mut response = [0u8; 260];
    let len = transport
        .exchange(2, &[0x03, 0x00, 0x00, 0x00, 0x02], &mut response)
        .await
        .unwrap();
    let mut r = Reader::new(&response[..len]);
    match Response::decode(&mut r).unwrap() {
        Response::ReadHoldingRegisters(resp) => assert_eq!(resp.register(0), Some(1)),
        other => panic!("unexpected response: {other:?}"),
    }

    let len = transport
        .exchange(1, &[0x06, 0x01, 0x90, 0x3E, 0x80], &mut response)
        .await
        .unwrap();
    assert_eq!(&response[..len], &[0x06, 0x01, 0x90, 0x3E, 0x80]);
    assert_eq!(charger.register(1, 400), Some(16000));
    assert_eq!(charger.register(2, 400), Some(0xFFFF));

    let len = transport
        .exchange(1, &[0x03, 0x01, 0x91, 0x00, 0x10], &mut response)
        .await
        .unwrap();
    assert_eq!(&response[..len], &[0x83, 0x02]);
    assert_eq!(charger.request_count(), 3);

    transport.close().await;
    server_task.abort();
    let _ = server_task.await;
}
