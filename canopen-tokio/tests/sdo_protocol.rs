//! End-to-end tests driving a [`ClientFSM`] against a [`ServerFSM`] over an
//! in-memory [`MemoryBus`], covering the scenarios from the component design.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use assert2::{assert, let_assert};

use canopen_tokio::dictionary::{AccessType, DataType, Entry, ObjectDictionary};
use canopen_tokio::sdo::codec::{self, CCS_DOWNLOAD_SEGMENT};
use canopen_tokio::sdo::{AbortCode, ClientFSM, SdoAddress, ServerFSM, SdoError, TransferAborted};
use canopen_tokio::transport::MemoryBus;

const SERVER_ID: u8 = 0x20;
const TIMEOUT: Duration = Duration::from_millis(30);

fn connect(dictionary: ObjectDictionary) -> (ClientFSM<MemoryBus>, ServerFSM<MemoryBus>) {
	let (client_bus, server_bus) = MemoryBus::pair();

	let mut client = ClientFSM::new(client_bus);
	client.add_server(SERVER_ID, SdoAddress::standard()).unwrap();
	client.init().unwrap();

	let mut server = ServerFSM::new(server_bus, Rc::new(RefCell::new(dictionary)));
	server.add_client(SERVER_ID, SdoAddress::standard()).unwrap();
	server.init().unwrap();

	(client, server)
}

#[tokio::test]
async fn expedited_upload_and_download_round_trip() {
	let mut dictionary = ObjectDictionary::new();
	dictionary.insert_var(0x2000, Entry::new(DataType::Unsigned32, AccessType::ReadWrite, 0u32.to_le_bytes()));
	let (client, mut server) = connect(dictionary);

	let local = tokio::task::LocalSet::new();
	local.run_until(async move {
		tokio::task::spawn_local(async move { server.run().await });

		client.download::<u32>(SERVER_ID, 0x2000, 0, &0xDEAD_BEEF, TIMEOUT).await.unwrap();
		let_assert!(Ok(value) = client.upload::<u32>(SERVER_ID, 0x2000, 0, TIMEOUT).await);
		assert!(value == 0xDEAD_BEEF);
	}).await;
}

#[tokio::test]
async fn segmented_transfer_round_trips_string() {
	let mut dictionary = ObjectDictionary::new();
	dictionary.insert_var(0x2001, Entry::new(DataType::VisibleString, AccessType::ReadWrite, Vec::new()));
	let (client, mut server) = connect(dictionary);

	let local = tokio::task::LocalSet::new();
	local.run_until(async move {
		tokio::task::spawn_local(async move { server.run().await });

		client.download(SERVER_ID, 0x2001, 0, &"HelloWorld".to_string(), TIMEOUT).await.unwrap();
		let_assert!(Ok(value) = client.upload::<String>(SERVER_ID, 0x2001, 0, TIMEOUT).await);
		assert!(value == "HelloWorld");
	}).await;
}

#[tokio::test]
async fn download_to_read_only_object_is_rejected() {
	let mut dictionary = ObjectDictionary::new();
	dictionary.insert_var(0x2002, Entry::new(DataType::Unsigned8, AccessType::ReadOnly, [0u8]));
	let (client, mut server) = connect(dictionary);

	let local = tokio::task::LocalSet::new();
	local.run_until(async move {
		tokio::task::spawn_local(async move { server.run().await });

		let_assert!(Err(error) = client.download_raw(SERVER_ID, 0x2002, 0, &[1], TIMEOUT).await);
		let_assert!(SdoError::TransferAborted(TransferAborted { reason }) = error);
		assert!(reason == Ok(AbortCode::ReadOnly));
	}).await;
}

#[tokio::test]
async fn upload_from_write_only_object_is_rejected() {
	let mut dictionary = ObjectDictionary::new();
	dictionary.insert_var(0x2003, Entry::new(DataType::Unsigned8, AccessType::WriteOnly, [7u8]));
	let (client, mut server) = connect(dictionary);

	let local = tokio::task::LocalSet::new();
	local.run_until(async move {
		tokio::task::spawn_local(async move { server.run().await });

		let_assert!(Err(error) = client.upload_raw(SERVER_ID, 0x2003, 0, TIMEOUT).await);
		let_assert!(SdoError::TransferAborted(TransferAborted { reason }) = error);
		assert!(reason == Ok(AbortCode::WriteOnly));
	}).await;
}

#[tokio::test]
async fn upload_of_unknown_object_aborts_with_object_undefined() {
	let (client, mut server) = connect(ObjectDictionary::new());

	let local = tokio::task::LocalSet::new();
	local.run_until(async move {
		tokio::task::spawn_local(async move { server.run().await });

		let_assert!(Err(error) = client.upload_raw(SERVER_ID, 0x3000, 0, TIMEOUT).await);
		let_assert!(SdoError::TransferAborted(TransferAborted { reason }) = error);
		assert!(reason == Ok(AbortCode::ObjectUndefined));
	}).await;
}

/// Drives a download-segment with a stale toggle bit directly against a
/// [`ServerFSM`], exercising the toggle check without a full client round-trip.
#[tokio::test]
async fn server_aborts_segment_with_wrong_toggle() {
	let mut dictionary = ObjectDictionary::new();
	dictionary.insert_var(0x2004, Entry::new(DataType::VisibleString, AccessType::ReadWrite, Vec::new()));
	let dictionary = Rc::new(RefCell::new(dictionary));
	let (_client_bus, server_bus) = MemoryBus::pair();
	let mut server = ServerFSM::new(server_bus, dictionary);
	server.add_client(SERVER_ID, SdoAddress::standard()).unwrap();
	server.init().unwrap();

	let cob_id_rx = 0x600 + u16::from(SERVER_ID);
	let frame = |data: [u8; 8]| can_socket::CanFrame::new(
		can_socket::CanId::new_standard(cob_id_rx).unwrap(),
		&data,
		None,
	).unwrap();

	let initiate = codec::encode_initiate_download(0x2004, 0, 10, None);
	let_assert!(Some(_ack) = server.handle_frame(frame(initiate)));

	// Toggle should be `false` for the first segment; send `true` instead.
	let bad_segment = codec::encode_segment(CCS_DOWNLOAD_SEGMENT, true, b"HelloWo", false);
	let_assert!(Some(reply) = server.handle_frame(frame(bad_segment)));
	let code = codec::decode_abort_code(&{
		let mut data = [0u8; 8];
		data.copy_from_slice(reply.data());
		data
	});
	assert!(code == AbortCode::ToggleBit.to_raw());
}

/// Drives a segmented download directly against a [`ServerFSM`], declaring a
/// total size that the actually-transferred segment bytes don't match.
#[tokio::test]
async fn server_aborts_download_with_wrong_declared_size() {
	let mut dictionary = ObjectDictionary::new();
	dictionary.insert_var(0x2005, Entry::new(DataType::VisibleString, AccessType::ReadWrite, Vec::new()));
	let dictionary = Rc::new(RefCell::new(dictionary));
	let (_client_bus, server_bus) = MemoryBus::pair();
	let mut server = ServerFSM::new(server_bus, dictionary);
	server.add_client(SERVER_ID, SdoAddress::standard()).unwrap();
	server.init().unwrap();

	let cob_id_rx = 0x600 + u16::from(SERVER_ID);
	let frame = |data: [u8; 8]| can_socket::CanFrame::new(
		can_socket::CanId::new_standard(cob_id_rx).unwrap(),
		&data,
		None,
	).unwrap();

	// Declare 10 bytes, but only ever send 7.
	let initiate = codec::encode_initiate_download(0x2005, 0, 10, None);
	let_assert!(Some(_ack) = server.handle_frame(frame(initiate)));

	let last_segment = codec::encode_segment(CCS_DOWNLOAD_SEGMENT, false, b"TooFew!", true);
	let_assert!(Some(reply) = server.handle_frame(frame(last_segment)));
	let code = codec::decode_abort_code(&{
		let mut data = [0u8; 8];
		data.copy_from_slice(reply.data());
		data
	});
	assert!(code == AbortCode::BadLength.to_raw());
}

#[tokio::test(start_paused = true)]
async fn upload_times_out_when_server_never_responds() {
	let (client, _dictionary) = connect(ObjectDictionary::new());
	// Intentionally never spawn the server: nothing will ever reply.

	let call = tokio::spawn(async move {
		client.upload_raw(SERVER_ID, 0x2000, 0, TIMEOUT).await
	});
	tokio::time::advance(TIMEOUT * 2).await;
	let_assert!(Ok(Err(SdoError::Timeout)) = call.await);
}
