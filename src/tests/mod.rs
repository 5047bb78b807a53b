mod test_decoder;
