use secrecy::SecretString;
use sealtree_crypto::{decrypt, derive_key, encrypt, generate_iv, open, seal};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [10_000, 100_000, 300_000])]
fn bench_derive_key(bencher: divan::Bencher, iterations: u32) {
    let passphrase = SecretString::from("bench-passphrase");
    let salt = [0xABu8; 16];
    bencher.bench(|| {
        derive_key(
            divan::black_box(&passphrase),
            divan::black_box(&salt),
            iterations,
        )
        .unwrap()
    });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt(bencher: divan::Bencher, size: usize) {
    let key = derive_key(&SecretString::from("bench"), &[1u8; 16], 1).unwrap();
    let iv = generate_iv();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| encrypt(divan::black_box(&data), &key, &iv).unwrap());
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_decrypt(bencher: divan::Bencher, size: usize) {
    let key = derive_key(&SecretString::from("bench"), &[1u8; 16], 1).unwrap();
    let iv = generate_iv();
    let encrypted = encrypt(&make_data(size), &key, &iv).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| decrypt(divan::black_box(&encrypted), &key, &iv).unwrap());
}

#[divan::bench]
fn bench_seal_open_default_iterations(bencher: divan::Bencher) {
    let passphrase = SecretString::from("bench-passphrase");
    let data = make_data(4096);
    bencher.bench(|| {
        let envelope = seal(divan::black_box(&data), &passphrase, 300_000).unwrap();
        open(&envelope, &passphrase).unwrap()
    });
}

fn main() {
    divan::main();
}
