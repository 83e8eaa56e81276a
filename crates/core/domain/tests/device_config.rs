use domain::{ConnectionKey, DeviceConfig, Endian, Framer, Section, TransportConfig};

#[test]
fn device_config_from_json_with_command_map() {
    let json = r#"{
        "deviceName": "Temp Sensor",
        "type": "tcp",
        "host": "127.0.0.1",
        "port": 5021,
        "method": "rtu",
        "byteOrder": "BIG",
        "unitId": 2,
        "retries": true,
        "timeseries": [
            {"tag": "temp", "type": "16int", "functionCode": 4, "address": 0, "registersCount": 1, "divider": 10}
        ],
        "rpc": {
            "setTemp": {"type": "16int", "functionCode": 6, "address": 3, "objectsCount": 1},
            "getTemp": {"type": "16int", "functionCode": 3, "address": 3, "objectsCount": 1}
        }
    }"#;

    let device: DeviceConfig = serde_json::from_str(json).expect("device config");
    assert_eq!(device.device_name, "Temp Sensor");
    assert_eq!(device.unit_id, 2);
    assert_eq!(device.byte_order, Some(Endian::Big));
    assert_eq!(device.word_order, None);
    assert_eq!(device.poll_period, 5000);
    match &device.transport {
        TransportConfig::Tcp(tcp) => {
            assert_eq!(tcp.host, "127.0.0.1");
            assert_eq!(tcp.port, 5021);
            assert_eq!(tcp.method, Framer::Rtu);
        }
        other => panic!("unexpected transport: {:?}", other),
    }

    let temp = &device.timeseries[0];
    assert_eq!(temp.objects_count, 1);
    assert_eq!(temp.extra_f64("divider"), Some(10.0));

    // map 形式的命令表按 tag 归一为有序列表
    let tags: Vec<&str> = device.rpc.iter().map(|command| command.tag.as_str()).collect();
    assert_eq!(tags, vec!["getTemp", "setTemp"]);
    assert_eq!(device.find_command("setTemp").map(|c| c.address), Some(3));
    assert!(device.find_command("missing").is_none());
}

#[test]
fn command_list_and_serial_key() {
    let json = r#"{
        "deviceName": "Meter",
        "type": "serial",
        "port": "/dev/ttyUSB0",
        "baudrate": 9600,
        "rpc": [{"tag": "reset", "type": "bits", "functionCode": 5, "address": 1}]
    }"#;

    let device: DeviceConfig = serde_json::from_str(json).expect("device config");
    assert_eq!(device.rpc.len(), 1);
    assert_eq!(device.rpc[0].tag, "reset");

    let key = device.connection_key();
    assert!(key.is_exclusive());
    assert_eq!(
        key,
        ConnectionKey::Serial {
            port: "/dev/ttyUSB0".to_string(),
            method: Framer::Rtu,
        }
    );
}

#[test]
fn polled_sections_skip_command_sections() {
    let json = r#"{
        "deviceName": "Pump",
        "type": "tcp",
        "host": "10.0.0.5",
        "attributes": [{"tag": "model", "type": "string", "functionCode": 3, "address": 10, "objectsCount": 4}],
        "attributeUpdates": [{"tag": "speed", "type": "16int", "functionCode": 6, "address": 20}]
    }"#;

    let device: DeviceConfig = serde_json::from_str(json).expect("device config");
    let sections = device.polled_sections();
    assert_eq!(sections[0].0, Section::Attributes);
    assert_eq!(sections[0].1.len(), 1);
    assert_eq!(sections[1].0, Section::Timeseries);
    assert!(sections[1].1.is_empty());
    assert!(!device.connection_key().is_exclusive());
}

#[test]
fn udp_transport_is_rejected() {
    let json = r#"{"deviceName": "Legacy", "type": "udp", "host": "10.0.0.9", "port": 502}"#;
    assert!(serde_json::from_str::<DeviceConfig>(json).is_err());
}
