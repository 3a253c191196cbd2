#[cfg(test)]
mod tests {
    use crate::bert::BertSelfAttention;
    use burn::tensor::{backend::Backend, Bool, Int, Tensor, TensorData};
    use burn_ndarray::{NdArray, NdArrayDevice};

    const HIDDEN_SIZE: usize = 384;
    const NUM_ATTENTION_HEADS: usize = 12;

    fn make_hidden<B: Backend>(device: &B::Device, batch: usize, seq: usize) -> Tensor<B, 3> {
        let total = batch * seq * HIDDEN_SIZE;
        let data: Vec<f32> = (0..total)
            .map(|idx| idx as f32 / total as f32)
            .collect();
        Tensor::from_data(TensorData::new(data, [batch, seq, HIDDEN_SIZE]), device)
    }

    fn make_attention_mask<B: Backend>(
        device: &B::Device,
        batch: usize,
        seq: usize,
    ) -> Tensor<B, 4, Bool> {
        let total = batch * NUM_ATTENTION_HEADS * seq * seq;
        let data = vec![false; total];
        Tensor::from_data(
            TensorData::new(data, [batch, NUM_ATTENTION_HEADS, seq, seq]),
            device,
        )
    }

    #[test]
    fn attention_head_reshape_shapes_ndarray() {
        let device = NdArrayDevice::default();
        let attention = BertSelfAttention::<NdArray<f32>>::new(&device);

        for (batch, seq) in [(1usize, 4usize), (2, 7), (3, 11)] {
            let hidden = make_hidden::<NdArray<f32>>(&device, batch, seq);
            let mask = make_attention_mask::<NdArray<f32>>(&device, batch, seq);
            let output = attention.forward(hidden, &mask);
            let dims = output.dims();
            assert_eq!(
                dims,
                [batch, seq, HIDDEN_SIZE],
                "Unexpected output shape for batch {batch} seq {seq}"
            );
        }
    }
}
