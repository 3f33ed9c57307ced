mod common;

use tessera::{
    device::DeviceBuffer,
    mla::{LATENT_RANK, MlaOperation, QK_RANK},
};

#[test]
fn decode_attention_matches_the_reference_per_batch_lengths() {
    let batch = 3u32;
    let heads = 4u32;
    let max_kv_len = 40u32;
    let lengths = [33i32, 17, 40];
    let scale = 1.0 / (QK_RANK as f32).sqrt();

    let mut rng = common::rng(41);
    let q_host = common::random_f32(&mut rng, (batch * heads * QK_RANK) as usize);
    let kv_host = common::random_f32(&mut rng, (batch * max_kv_len * QK_RANK) as usize);
    let mut q = DeviceBuffer::from_slice(&q_host);
    let mut kv = DeviceBuffer::from_slice(&kv_host);
    let mut kv_lengths = DeviceBuffer::from_slice(&lengths);
    let mut out = DeviceBuffer::zeroed((batch * heads * LATENT_RANK) as usize * 4);
    let mut scores = DeviceBuffer::zeroed((batch * heads * max_kv_len) as usize * 4);
    let mut probs = DeviceBuffer::zeroed((batch * heads * max_kv_len) as usize * 4);
    let mut out_acc = DeviceBuffer::zeroed((batch * heads * LATENT_RANK) as usize * 4);

    MlaOperation::<f32>::new()
        .run(
            2,
            batch,
            heads,
            max_kv_len,
            scale,
            q.tensor(),
            kv.tensor(),
            kv_lengths.tensor(),
            &lengths,
            out.tensor(),
            scores.tensor(),
            probs.tensor(),
            out_acc.tensor(),
        )
        .unwrap();

    let result = out.as_slice::<f32>();
    for b in 0..batch as usize {
        let len = lengths[b] as usize;
        for h in 0..heads as usize {
            let q_row = &q_host[(b * heads as usize + h) * QK_RANK as usize..]
                [..QK_RANK as usize];

            // Scaled scores over the cached positions.
            let mut s = vec![0.0f32; len];
            for (j, value) in s.iter_mut().enumerate() {
                let kv_row = &kv_host
                    [(b * max_kv_len as usize + j) * QK_RANK as usize..][..QK_RANK as usize];
                let mut acc = 0.0f32;
                for d in 0..QK_RANK as usize {
                    acc += q_row[d] * kv_row[d];
                }
                *value = acc * scale;
            }

            let max = s.iter().fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            let mut sum = 0.0f32;
            let mut p = vec![0.0f32; len];
            for j in 0..len {
                p[j] = (s[j] - max).exp();
                sum += p[j];
            }
            for value in &mut p {
                *value /= sum;
            }

            for d in 0..LATENT_RANK as usize {
                let mut acc = 0.0f32;
                for (j, &weight) in p.iter().enumerate() {
                    acc += weight * kv_host[(b * max_kv_len as usize + j) * QK_RANK as usize + d];
                }
                let got =
                    result[(b * heads as usize + h) * LATENT_RANK as usize + d];
                common::assert_close(got, acc, 1e-4, &format!("out[{b}][{h}][{d}]"));
            }
        }
    }
}

#[test]
fn stale_workspace_contents_do_not_leak_between_batches() {
    // Shorter second batch over a workspace row dirtied past its length.
    let batch = 2u32;
    let heads = 2u32;
    let max_kv_len = 16u32;
    let lengths = [16i32, 3];

    let mut rng = common::rng(42);
    let q_host = common::random_f32(&mut rng, (batch * heads * QK_RANK) as usize);
    let kv_host = common::random_f32(&mut rng, (batch * max_kv_len * QK_RANK) as usize);
    let mut q = DeviceBuffer::from_slice(&q_host);
    let mut kv = DeviceBuffer::from_slice(&kv_host);
    let mut kv_lengths = DeviceBuffer::from_slice(&lengths);
    let mut out = DeviceBuffer::zeroed((batch * heads * LATENT_RANK) as usize * 4);
    let mut scores =
        DeviceBuffer::from_slice(&vec![1.0e30f32; (batch * heads * max_kv_len) as usize]);
    let mut probs =
        DeviceBuffer::from_slice(&vec![1.0e30f32; (batch * heads * max_kv_len) as usize]);
    let mut out_acc = DeviceBuffer::zeroed((batch * heads * LATENT_RANK) as usize * 4);

    MlaOperation::<f32>::new()
        .run(
            1,
            batch,
            heads,
            max_kv_len,
            0.1,
            q.tensor(),
            kv.tensor(),
            kv_lengths.tensor(),
            &lengths,
            out.tensor(),
            scores.tensor(),
            probs.tensor(),
            out_acc.tensor(),
        )
        .unwrap();

    // Batch 1 attends over 3 positions only; its probabilities are a
    // convex combination, so every output column stays within the range
    // of the attended latent values.
    let b = 1usize;
    let result = out.as_slice::<f32>();
    for h in 0..heads as usize {
        for d in 0..LATENT_RANK as usize {
            let values: Vec<f32> = (0..3)
                .map(|j| kv_host[(b * max_kv_len as usize + j) * QK_RANK as usize + d])
                .collect();
            let lo = values.iter().cloned().fold(f32::INFINITY, f32::min);
            let hi = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let got = result[(b * heads as usize + h) * LATENT_RANK as usize + d];
            assert!(
                got >= lo - 1e-4 && got <= hi + 1e-4,
                "out[{b}][{h}][{d}] = {got} outside [{lo}, {hi}]"
            );
        }
    }
}
