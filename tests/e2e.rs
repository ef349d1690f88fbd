use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

const MD5_PASSWORD: &str = "5f4dcc3b5aa765d61d8327deb882cf99";
const MD5_123456: &str = "e10adc3949ba59abbe56e057f20f883e";
const MD5_12345678: &str = "25d55ad283aa400af464c76d713c07ad";

fn write_file(path: &Path, content: &str) {
	let mut f = fs::File::create(path).unwrap();
	f.write_all(content.as_bytes()).unwrap();
}

#[cfg(unix)]
fn write_stub(path: &Path, body: &str) {
	use std::os::unix::fs::PermissionsExt;
	write_file(path, body);
	fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Stub cracker: locates the --potfile-path argument and appends the
/// contents of cracks.txt (from the working directory) to it.
#[cfg(unix)]
fn write_cracking_stub(path: &Path) {
	write_stub(
		path,
		"#!/bin/sh\n\
		 pot=\"\"; prev=\"\"\n\
		 for a in \"$@\"; do\n\
		 \t[ \"$prev\" = \"--potfile-path\" ] && pot=\"$a\"\n\
		 \tprev=\"$a\"\n\
		 done\n\
		 cat cracks.txt >> \"$pot\"\n\
		 exit 0\n",
	);
}

#[test]
fn analyze_reports_types_and_recommendations() {
	let tmp = tempdir().unwrap();
	let hash_file = tmp.path().join("mixed.txt");
	let mut content = String::new();
	for i in 0..5 {
		content.push_str(&format!("{:032x}\n", 0x1000 + i));
	}
	for i in 0..2 {
		content.push_str(&format!("{:040x}\n", 0x2000 + i));
	}
	content.push_str("definitely not a hash\n");
	write_file(&hash_file, &content);

	let mut cmd = Command::cargo_bin("hashwrap").unwrap();
	cmd.current_dir(tmp.path()).arg("analyze").arg(&hash_file);
	cmd.assert()
		.success()
		.stdout(predicate::str::contains("Total hashes: 8"))
		.stdout(predicate::str::contains("MD5"))
		.stdout(predicate::str::contains("SHA1"))
		.stdout(predicate::str::contains("Split hashes by type"));
}

#[test]
fn resume_of_unknown_session_exits_2() {
	let tmp = tempdir().unwrap();
	let mut cmd = Command::cargo_bin("hashwrap").unwrap();
	cmd.current_dir(tmp.path())
		.arg("resume")
		.arg("20200101_000000")
		.arg("--sessions-root")
		.arg("sessions");
	cmd.assert().code(2);
}

#[test]
fn restore_without_session_is_refused() {
	let tmp = tempdir().unwrap();
	let hash_file = tmp.path().join("hashes.txt");
	write_file(&hash_file, &format!("{MD5_PASSWORD}\n"));
	let mut cmd = Command::cargo_bin("hashwrap").unwrap();
	cmd.current_dir(tmp.path())
		.arg("auto")
		.arg(&hash_file)
		.arg("--restore");
	cmd.assert()
		.failure()
		.code(1)
		.stderr(predicate::str::contains("--restore requires --session"));
}

#[cfg(unix)]
#[test]
fn auto_cracks_all_hashes_with_stub_cracker() {
	let tmp = tempdir().unwrap();
	fs::create_dir(tmp.path().join("wordlists")).unwrap();
	write_file(
		&tmp.path().join("hashes.txt"),
		&format!("{MD5_PASSWORD}\n{MD5_123456}\n{MD5_12345678}\n"),
	);
	write_file(
		&tmp.path().join("wordlists/top100k.txt"),
		"password\n123456\n12345678\n",
	);
	write_file(
		&tmp.path().join("cracks.txt"),
		&format!(
			"{MD5_PASSWORD}:password\n{MD5_123456}:123456\n{MD5_12345678}:12345678\n"
		),
	);
	write_cracking_stub(&tmp.path().join("fakecat"));

	let mut cmd = Command::cargo_bin("hashwrap").unwrap();
	cmd.current_dir(tmp.path())
		.arg("auto")
		.arg("hashes.txt")
		.arg("--cracker")
		.arg("./fakecat")
		.arg("--sessions-root")
		.arg("sessions");
	cmd.assert()
		.success()
		.stdout(predicate::str::contains("Cracked: 3 (100.0%)"))
		.stdout(predicate::str::contains("Remaining: 0"));

	// The per-session potfile holds the three results.
	let session_dirs: Vec<_> = fs::read_dir(tmp.path().join("sessions"))
		.unwrap()
		.flatten()
		.filter(|e| e.file_name().to_string_lossy().starts_with("session_"))
		.collect();
	assert_eq!(session_dirs.len(), 1);
	let potfile = session_dirs[0].path().join("hashwrap.potfile");
	let pot = fs::read_to_string(potfile).unwrap();
	assert!(pot.contains(&format!("{MD5_PASSWORD}:password")));
	assert_eq!(pot.lines().count(), 3);

	let session_json =
		fs::read_to_string(session_dirs[0].path().join("session.json")).unwrap();
	let state: serde_json::Value = serde_json::from_str(&session_json).unwrap();
	assert_eq!(state["status"], "completed");
	assert_eq!(state["statistics"]["cracked_hashes"], 3);

	// Attack-results CSV lands next to the invocation.
	let reports: Vec<_> = fs::read_dir(tmp.path())
		.unwrap()
		.flatten()
		.filter(|e| {
			let name = e.file_name().to_string_lossy().to_string();
			name.starts_with("hashwrap_report_") && name.ends_with(".csv")
		})
		.collect();
	assert_eq!(reports.len(), 1);
}

#[cfg(unix)]
#[test]
fn timeout_pauses_session_and_resume_passes_restore_once() {
	let tmp = tempdir().unwrap();
	fs::create_dir(tmp.path().join("wordlists")).unwrap();
	write_file(&tmp.path().join("hashes.txt"), &format!("{MD5_PASSWORD}\n"));
	write_file(&tmp.path().join("wordlists/top100k.txt"), "password\n");
	write_file(
		&tmp.path().join("cracks.txt"),
		&format!("{MD5_PASSWORD}:password\n"),
	);
	// First phase: a cracker that never finishes inside the timeout.
	write_stub(&tmp.path().join("slowcat"), "#!/bin/sh\nsleep 30\n");

	let mut cmd = Command::cargo_bin("hashwrap").unwrap();
	cmd.current_dir(tmp.path())
		.arg("auto")
		.arg("hashes.txt")
		.arg("--session")
		.arg("s3test")
		.arg("--cracker")
		.arg("./slowcat")
		.arg("--attack-timeout")
		.arg("1")
		.arg("--sessions-root")
		.arg("sessions");
	cmd.assert().success();

	let session_dir = tmp.path().join("sessions/session_s3test");
	let state: serde_json::Value =
		serde_json::from_str(&fs::read_to_string(session_dir.join("session.json")).unwrap())
			.unwrap();
	assert_eq!(state["status"], "paused");
	assert!(
		!state["pending_attacks"].as_array().unwrap().is_empty(),
		"timed-out attack must be pending again"
	);

	// The cracker left native restore state behind.
	write_file(&session_dir.join("s3test.restore"), "native restore state");

	// Second phase: a cracker that records its argv and cracks everything.
	write_stub(
		&tmp.path().join("fastcat"),
		"#!/bin/sh\n\
		 echo \"$@\" >> argv.log\n\
		 pot=\"\"; prev=\"\"\n\
		 for a in \"$@\"; do\n\
		 \t[ \"$prev\" = \"--potfile-path\" ] && pot=\"$a\"\n\
		 \tprev=\"$a\"\n\
		 done\n\
		 cat cracks.txt >> \"$pot\"\n\
		 exit 0\n",
	);

	let mut cmd = Command::cargo_bin("hashwrap").unwrap();
	cmd.current_dir(tmp.path())
		.arg("resume")
		.arg("s3test")
		.arg("--cracker")
		.arg("./fastcat")
		.arg("--sessions-root")
		.arg("sessions");
	cmd.assert()
		.success()
		.stdout(predicate::str::contains("Cracked: 1"));

	let argv_log = fs::read_to_string(tmp.path().join("argv.log")).unwrap();
	let first_invocation = argv_log.lines().next().unwrap();
	assert!(
		first_invocation.contains("--restore"),
		"first post-resume attack carries the restore flag: {first_invocation}"
	);
	assert!(first_invocation.contains("--session"));
	// The flag is consumed by exactly one attack.
	for later in argv_log.lines().skip(1) {
		assert!(!later.contains("--restore"), "restore leaked into: {later}");
	}

	let state: serde_json::Value =
		serde_json::from_str(&fs::read_to_string(session_dir.join("session.json")).unwrap())
			.unwrap();
	assert_eq!(state["status"], "completed");
}

#[cfg(unix)]
#[test]
fn hashes_dropped_mid_run_are_hot_reloaded() {
	let tmp = tempdir().unwrap();
	fs::create_dir(tmp.path().join("wordlists")).unwrap();
	write_file(&tmp.path().join("hashes.txt"), &format!("{MD5_PASSWORD}\n"));
	write_file(&tmp.path().join("wordlists/top100k.txt"), "password\n");
	write_file(&tmp.path().join("wordlists/top100.txt"), "password\n");
	write_file(
		&tmp.path().join("cracks.txt"),
		&format!(
			"{MD5_PASSWORD}:password\n{MD5_123456}:123456\n{MD5_12345678}:12345678\n"
		),
	);
	// Cracks only once the marker appears; until then it burns the clock and
	// exhausts, leaving the engine running long enough for a drop.
	write_stub(
		&tmp.path().join("fakecat"),
		"#!/bin/sh\n\
		 pot=\"\"; prev=\"\"\n\
		 for a in \"$@\"; do\n\
		 \t[ \"$prev\" = \"--potfile-path\" ] && pot=\"$a\"\n\
		 \tprev=\"$a\"\n\
		 done\n\
		 if [ -f crack_now ]; then\n\
		 \tcat cracks.txt >> \"$pot\"\n\
		 \texit 0\n\
		 fi\n\
		 sleep 10\n\
		 exit 1\n",
	);

	// Drop two more hashes (and the marker) while the first attack runs.
	let drop_dir = tmp.path().join("sessions/incoming_hashes");
	let dropper = {
		let drop_dir = drop_dir.clone();
		let tmp_root = tmp.path().to_path_buf();
		std::thread::spawn(move || {
			std::thread::sleep(std::time::Duration::from_secs(2));
			fs::create_dir_all(&drop_dir).unwrap();
			write_file(
				&drop_dir.join("extra.txt"),
				&format!("{MD5_123456}\n{MD5_12345678}\n"),
			);
			write_file(&tmp_root.join("crack_now"), "");
		})
	};

	let mut cmd = Command::cargo_bin("hashwrap").unwrap();
	cmd.current_dir(tmp.path())
		.arg("auto")
		.arg("hashes.txt")
		.arg("--cracker")
		.arg("./fakecat")
		.arg("--sessions-root")
		.arg("sessions");
	cmd.assert()
		.success()
		.stdout(predicate::str::contains("Cracked: 3 (100.0%)"))
		.stdout(predicate::str::contains("Hashes added: 2"));
	dropper.join().unwrap();

	// The dropped file was archived under processed/.
	let processed: Vec<_> = fs::read_dir(drop_dir.join("processed"))
		.unwrap()
		.flatten()
		.collect();
	assert_eq!(processed.len(), 1);
}
