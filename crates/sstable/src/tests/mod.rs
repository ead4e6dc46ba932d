mod block_tests;
